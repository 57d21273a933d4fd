//! The transition engine.
//!
//! [`TransitionEngine::execute`] validates a transition request, commits
//! the state change together with its history row, then runs best-effort
//! side effects. Validation failures mutate nothing; once the commit lands,
//! side-effect failures are returned as diagnostics on the outcome.

use std::sync::Arc;

use chrono::Utc;
use triage_core::error::CoreError;
use triage_core::requirement::{check_requirements, RequirementCheck, SuppliedInputs};
use triage_core::sla::compute_deadline;
use triage_core::types::DbId;
use triage_core::workflow::{denotes_resolved, is_role_permitted, StateType};
use triage_db::models::history::{CreateComment, CreateFeedback, CreateTransitionHistory, TransitionHistory};
use triage_db::models::incident::{Incident, TransitionCommit, TransitionUpdate};
use triage_db::models::workflow::{Transition, WorkflowState};

use crate::actions::{ActionContext, ActionExecutor};
use crate::assignment::AssignmentResolver;
use crate::config::EngineConfig;
use crate::error::WorkflowResult;
use crate::outcome::{SideEffectFailure, SideEffectStage, TransitionOutcome};
use crate::revision::RevisionWriter;
use crate::store::{Collaborators, IncidentStore, WorkflowStore};

/// Lowest and highest accepted feedback rating.
const FEEDBACK_RATING_RANGE: std::ops::RangeInclusive<i16> = 1..=5;

/// Satisfaction feedback submitted with a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackInput {
    pub rating: i16,
    pub comment: Option<String>,
}

/// A request to move an incident along one transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    pub incident_id: DbId,
    pub transition_id: DbId,
    pub comment: Option<String>,
    pub attachment_ids: Vec<DbId>,
    /// Used when the transition auto-detects the department.
    pub department_id: Option<DbId>,
    /// Used when the transition asks the caller to pick an assignee.
    pub assignee_id: Option<DbId>,
    pub feedback: Option<FeedbackInput>,
    pub actor_id: DbId,
    pub actor_role_ids: Vec<DbId>,
}

impl TransitionRequest {
    pub fn new(incident_id: DbId, transition_id: DbId, actor_id: DbId) -> Self {
        Self {
            incident_id,
            transition_id,
            actor_id,
            ..Default::default()
        }
    }

    /// The trimmed comment, if any text remains.
    fn comment_text(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Feedback with a non-zero rating; zero means "not given".
    fn given_feedback(&self) -> Option<&FeedbackInput> {
        self.feedback.as_ref().filter(|f| f.rating != 0)
    }
}

#[derive(Clone)]
pub struct TransitionEngine {
    workflows: Arc<dyn WorkflowStore>,
    incidents: Arc<dyn IncidentStore>,
    resolver: AssignmentResolver,
    executor: ActionExecutor,
    revisions: RevisionWriter,
}

impl TransitionEngine {
    pub fn new(collaborators: &Collaborators, config: &EngineConfig) -> Self {
        Self {
            workflows: Arc::clone(&collaborators.workflows),
            incidents: Arc::clone(&collaborators.incidents),
            resolver: AssignmentResolver::new(Arc::clone(&collaborators.users)),
            executor: ActionExecutor::new(collaborators, config),
            revisions: RevisionWriter::new(Arc::clone(&collaborators.revisions)),
        }
    }

    /// The executor running transition actions, for draining on shutdown.
    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Active transitions leaving the incident's current state that the
    /// actor's roles permit, by id.
    pub async fn available_transitions(
        &self,
        incident_id: DbId,
        actor_role_ids: &[DbId],
    ) -> WorkflowResult<Vec<Transition>> {
        let incident = self.load_incident(incident_id).await?;
        let mut transitions: Vec<Transition> = self
            .workflows
            .transitions_from_state(incident.current_state_id)
            .await?
            .into_iter()
            .filter(|t| {
                t.is_active
                    && t.workflow_id == incident.workflow_id
                    && is_role_permitted(&t.allowed_role_ids, actor_role_ids)
            })
            .collect();
        transitions.sort_by_key(|t| t.id);
        Ok(transitions)
    }

    /// Execute a transition.
    pub async fn execute(&self, request: TransitionRequest) -> WorkflowResult<TransitionOutcome> {
        // -- validation: nothing below mutates until the commit -------------

        let incident = self.load_incident(request.incident_id).await?;
        let relations = self
            .workflows
            .find_transition(request.transition_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "transition",
                id: request.transition_id,
            })?;
        let transition = &relations.transition;

        if transition.workflow_id != incident.workflow_id {
            return Err(CoreError::InvalidTransition(format!(
                "Transition '{}' does not belong to the incident's workflow",
                transition.name
            ))
            .into());
        }
        if !transition.is_active {
            return Err(CoreError::InvalidTransition(format!(
                "Transition '{}' is inactive",
                transition.name
            ))
            .into());
        }
        if transition.from_state_id != incident.current_state_id {
            return Err(CoreError::InvalidTransition(format!(
                "Transition '{}' is not available from the incident's current state",
                transition.name
            ))
            .into());
        }
        if !is_role_permitted(&transition.allowed_role_ids, &request.actor_role_ids) {
            return Err(CoreError::Forbidden(format!(
                "Your roles do not permit the '{}' transition",
                transition.name
            ))
            .into());
        }

        let comment = request.comment_text();
        let feedback = request.given_feedback();
        let checks: Vec<RequirementCheck<'_>> = relations
            .requirements
            .iter()
            .map(|r| RequirementCheck {
                requirement_type: &r.requirement_type,
                is_mandatory: r.is_mandatory,
                error_message: r.error_message.as_deref(),
            })
            .collect();
        let inputs = SuppliedInputs {
            comment,
            attachment_count: request.attachment_ids.len(),
            feedback_rating: feedback.map(|f| f.rating),
        };
        let advisory_unmet = check_requirements(&checks, &inputs)?;
        if !advisory_unmet.is_empty() {
            tracing::debug!(
                incident_id = incident.id,
                transition_id = transition.id,
                unmet = ?advisory_unmet,
                "Advisory requirements not met"
            );
        }
        if let Some(feedback) = feedback {
            if !FEEDBACK_RATING_RANGE.contains(&feedback.rating) {
                return Err(CoreError::Validation(format!(
                    "Feedback rating must be between {} and {}",
                    FEEDBACK_RATING_RANGE.start(),
                    FEEDBACK_RATING_RANGE.end()
                ))
                .into());
            }
        }

        let from_state = self.load_state(incident.current_state_id).await?;
        let to_state = self.load_state(transition.to_state_id).await?;
        let to_type = StateType::from_str(&to_state.state_type)?;

        // -- build the update set -------------------------------------------

        let department_id = transition.assign_department_id.or(
            if transition.auto_detect_department {
                request.department_id
            } else {
                None
            },
        );
        let assignment = self
            .resolver
            .resolve(transition, &incident, request.assignee_id)
            .await?;

        let now = Utc::now();
        let sla_deadline = compute_deadline(now, to_state.sla_hours);
        if sla_deadline.is_some() && incident.sla_breached {
            tracing::debug!(
                incident_id = incident.id,
                to_state = %to_state.code,
                "Transition resets an existing SLA breach"
            );
        }
        let (closed_at, resolved_at) = if to_type == StateType::Terminal {
            let resolved = denotes_resolved(&to_state.code, &to_state.name);
            (Some(now), resolved.then_some(now))
        } else {
            (None, None)
        };

        let commit = TransitionCommit {
            incident_id: incident.id,
            expected_state_id: incident.current_state_id,
            update: TransitionUpdate {
                to_state_id: to_state.id,
                department_id,
                assignee_id: assignment.primary,
                assignee_ids: (!assignment.is_unchanged()).then(|| assignment.all.clone()),
                sla_deadline,
                closed_at,
                resolved_at,
                updated_at: now,
            },
            history: CreateTransitionHistory {
                incident_id: incident.id,
                transition_id: transition.id,
                from_state_id: incident.current_state_id,
                to_state_id: to_state.id,
                performed_by: request.actor_id,
                comment: comment.map(str::to_string),
            },
        };

        // -- commit -----------------------------------------------------------

        let Some(history) = self.incidents.commit_transition(&commit).await? else {
            return Err(self.commit_rejected(incident.id).await);
        };

        // -- best-effort side effects ----------------------------------------

        let mut diagnostics = Vec::new();
        self.link_attachments(&request, &history, &mut diagnostics).await;
        if let Some(body) = comment {
            self.add_transition_comment(&request, &history, body, &mut diagnostics)
                .await;
        }
        if let Some(feedback) = feedback {
            self.add_feedback(&request, &history, feedback, &mut diagnostics)
                .await;
        }

        let mut committed = self.reload(project(&incident, &commit.update)).await;

        if !relations.actions.is_empty() {
            let context = ActionContext {
                incident: committed.clone(),
                transition_name: transition.name.clone(),
                from_state: from_state.name.clone(),
                to_state: to_state.name.clone(),
                performed_by: request.actor_id,
            };
            diagnostics.extend(self.executor.execute(&relations.actions, context).await);
            committed = self.reload(committed).await;
        }

        self.record_revision(&committed, &from_state, &to_state, request.actor_id, &mut diagnostics)
            .await;

        tracing::info!(
            incident_id = committed.id,
            transition_id = transition.id,
            from_state = %from_state.code,
            to_state = %to_state.code,
            performed_by = request.actor_id,
            diagnostics = diagnostics.len(),
            "Transition executed"
        );

        Ok(TransitionOutcome {
            incident: committed,
            history,
            diagnostics,
        })
    }

    // -- loading --------------------------------------------------------------

    async fn load_incident(&self, id: DbId) -> WorkflowResult<Incident> {
        self.incidents
            .find_incident(id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "incident",
                id,
            })
            .map_err(Into::into)
    }

    async fn load_state(&self, id: DbId) -> WorkflowResult<WorkflowState> {
        self.workflows
            .find_state(id)
            .await?
            .ok_or(CoreError::NotFound { entity: "state", id })
            .map_err(Into::into)
    }

    /// Fresh copy of the incident, or `fallback` if the read fails.
    async fn reload(&self, fallback: Incident) -> Incident {
        match self.incidents.find_incident(fallback.id).await {
            Ok(Some(incident)) => incident,
            Ok(None) => {
                tracing::warn!(incident_id = fallback.id, "Incident vanished after transition");
                fallback
            }
            Err(e) => {
                tracing::warn!(incident_id = fallback.id, error = %e, "Failed to reload incident");
                fallback
            }
        }
    }

    /// Why a conditional commit wrote nothing.
    async fn commit_rejected(&self, incident_id: DbId) -> crate::error::WorkflowError {
        match self.incidents.find_incident(incident_id).await {
            Ok(None) => CoreError::NotFound {
                entity: "incident",
                id: incident_id,
            }
            .into(),
            Ok(Some(_)) | Err(_) => CoreError::ConcurrencyConflict(format!(
                "Incident {incident_id} changed state during the transition; reload and retry"
            ))
            .into(),
        }
    }

    // -- side effects -----------------------------------------------------------

    async fn link_attachments(
        &self,
        request: &TransitionRequest,
        history: &TransitionHistory,
        diagnostics: &mut Vec<SideEffectFailure>,
    ) {
        if request.attachment_ids.is_empty() {
            return;
        }
        let wanted = request.attachment_ids.len();
        match self
            .incidents
            .link_attachments(request.incident_id, history.id, &request.attachment_ids)
            .await
        {
            Ok(linked) if linked as usize == wanted => {}
            Ok(linked) => {
                tracing::warn!(
                    incident_id = request.incident_id,
                    history_id = history.id,
                    linked,
                    wanted,
                    "Some attachments could not be linked"
                );
                diagnostics.push(SideEffectFailure::new(
                    SideEffectStage::AttachmentLink,
                    format!("Linked {linked} of {wanted} attachments"),
                ));
            }
            Err(e) => {
                tracing::error!(
                    incident_id = request.incident_id,
                    history_id = history.id,
                    error = %e,
                    "Failed to link attachments"
                );
                diagnostics.push(SideEffectFailure::new(SideEffectStage::AttachmentLink, e.to_string()));
            }
        }
    }

    async fn add_transition_comment(
        &self,
        request: &TransitionRequest,
        history: &TransitionHistory,
        body: &str,
        diagnostics: &mut Vec<SideEffectFailure>,
    ) {
        let input = CreateComment {
            incident_id: request.incident_id,
            author_id: request.actor_id,
            body: body.to_string(),
            is_internal: true,
            transition_history_id: Some(history.id),
        };
        if let Err(e) = self.incidents.create_comment(&input).await {
            tracing::error!(
                incident_id = request.incident_id,
                history_id = history.id,
                error = %e,
                "Failed to create transition comment"
            );
            diagnostics.push(SideEffectFailure::new(SideEffectStage::Comment, e.to_string()));
        }
    }

    async fn add_feedback(
        &self,
        request: &TransitionRequest,
        history: &TransitionHistory,
        feedback: &FeedbackInput,
        diagnostics: &mut Vec<SideEffectFailure>,
    ) {
        let input = CreateFeedback {
            incident_id: request.incident_id,
            transition_history_id: history.id,
            user_id: request.actor_id,
            rating: feedback.rating,
            comment: feedback.comment.clone(),
        };
        if let Err(e) = self.incidents.create_feedback(&input).await {
            tracing::error!(
                incident_id = request.incident_id,
                history_id = history.id,
                error = %e,
                "Failed to create feedback"
            );
            diagnostics.push(SideEffectFailure::new(SideEffectStage::Feedback, e.to_string()));
        }
    }

    async fn record_revision(
        &self,
        incident: &Incident,
        from: &WorkflowState,
        to: &WorkflowState,
        actor_id: DbId,
        diagnostics: &mut Vec<SideEffectFailure>,
    ) {
        if let Err(e) = self
            .revisions
            .record_status_change(incident.id, from, to, actor_id)
            .await
        {
            tracing::error!(incident_id = incident.id, error = %e, "Failed to record status revision");
            diagnostics.push(SideEffectFailure::new(SideEffectStage::Revision, e.to_string()));
        }
    }
}

/// The incident as the committed update left it, for when a reload fails.
fn project(incident: &Incident, update: &TransitionUpdate) -> Incident {
    let mut projected = incident.clone();
    projected.current_state_id = update.to_state_id;
    projected.department_id = update.department_id.or(projected.department_id);
    projected.assignee_id = update.assignee_id.or(projected.assignee_id);
    if update.sla_deadline.is_some() {
        projected.sla_deadline = update.sla_deadline;
        projected.sla_breached = false;
    }
    projected.closed_at = update.closed_at.or(projected.closed_at);
    projected.resolved_at = update.resolved_at.or(projected.resolved_at);
    projected.updated_at = update.updated_at;
    projected
}
