//! Result type of a committed transition and its side-effect diagnostics.

use serde::Serialize;
use triage_core::types::DbId;
use triage_db::models::history::TransitionHistory;
use triage_db::models::incident::Incident;

/// Where a best-effort step failed after the state change committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectStage {
    AttachmentLink,
    Comment,
    Feedback,
    Action,
    Revision,
}

impl SideEffectStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttachmentLink => "attachment_link",
            Self::Comment => "comment",
            Self::Feedback => "feedback",
            Self::Action => "action",
            Self::Revision => "revision",
        }
    }
}

impl std::fmt::Display for SideEffectStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed side effect. Never reverses the committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SideEffectFailure {
    pub stage: SideEffectStage,
    pub action_id: Option<DbId>,
    pub action_type: Option<String>,
    pub message: String,
}

impl SideEffectFailure {
    pub fn new(stage: SideEffectStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            action_id: None,
            action_type: None,
            message: message.into(),
        }
    }

    pub fn for_action(
        stage: SideEffectStage,
        action_id: DbId,
        action_type: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            action_id: Some(action_id),
            action_type: Some(action_type.to_string()),
            message: message.into(),
        }
    }
}

/// A successful transition: the committed incident, its history row and
/// any side effects that failed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub incident: Incident,
    pub history: TransitionHistory,
    pub diagnostics: Vec<SideEffectFailure>,
}

impl TransitionOutcome {
    /// Whether every side effect succeeded.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn failures_at(&self, stage: SideEffectStage) -> impl Iterator<Item = &SideEffectFailure> {
        self.diagnostics.iter().filter(move |d| d.stage == stage)
    }
}
