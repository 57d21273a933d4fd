use crate::types::DbId;

/// Domain error taxonomy shared by every crate in the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Carries the user-facing message configured on the requirement.
    #[error("{0}")]
    RequirementNotMet(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Action '{action_type}' failed: {message}")]
    ActionFailure {
        action_type: String,
        message: String,
    },

    /// An optimistic update lost the race; re-read and retry.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the caller may succeed by retrying with a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict(_))
    }
}
