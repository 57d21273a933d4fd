use triage_core::error::CoreError;

use crate::store::StoreError;

/// Error returned by workflow operations.
///
/// Domain failures keep their [`CoreError`] variant so callers can map
/// them to user-facing responses; storage failures are wrapped separately.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
    /// Whether retrying with a fresh read may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(core) => core.is_retryable(),
            Self::Store(_) => false,
        }
    }

    /// The domain error, if this is one.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            Self::Core(core) => Some(core),
            Self::Store(_) => None,
        }
    }
}

impl From<sqlx::Error> for WorkflowError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(e))
    }
}
