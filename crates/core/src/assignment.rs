//! Assignment policy selection.
//!
//! A transition can name a fixed assignee, ask the caller to pick a member
//! of a role, or auto-match users by role and incident attributes. The
//! first policy configured wins.

use crate::types::DbId;

/// Assignment behaviour configured on a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentPolicy {
    /// A fixed user becomes the sole assignee.
    Static { user_id: DbId },
    /// The caller picks a member of `role_id`; no pick leaves assignment alone.
    ManualSelect { role_id: DbId },
    /// Query members of `role_id` matching the incident's attributes.
    AutoMatch { role_id: DbId },
    /// Assignment is left unchanged.
    Unchanged,
}

impl AssignmentPolicy {
    /// Derive the policy from a transition's assignment columns.
    pub fn from_transition(
        assign_user_id: Option<DbId>,
        assignment_role_id: Option<DbId>,
        manual_select_user: bool,
        auto_match_user: bool,
    ) -> Self {
        if let Some(user_id) = assign_user_id {
            return Self::Static { user_id };
        }
        match assignment_role_id {
            Some(role_id) if manual_select_user => Self::ManualSelect { role_id },
            Some(role_id) if auto_match_user => Self::AutoMatch { role_id },
            _ => Self::Unchanged,
        }
    }
}

/// Result of resolving a policy: the primary assignee and the full set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentOutcome {
    pub primary: Option<DbId>,
    pub all: Vec<DbId>,
}

impl AssignmentOutcome {
    /// No assignment change.
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// A single assignee.
    pub fn single(user_id: DbId) -> Self {
        Self {
            primary: Some(user_id),
            all: vec![user_id],
        }
    }

    /// Order candidates by id and pick the lowest as primary.
    pub fn from_candidates(mut candidates: Vec<DbId>) -> Self {
        candidates.sort_unstable();
        candidates.dedup();
        Self {
            primary: candidates.first().copied(),
            all: candidates,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.primary.is_none()
    }
}
