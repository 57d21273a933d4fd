//! Records owned by an incident that hang off a transition: history rows,
//! comments, feedback and attachments.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use triage_core::types::{DbId, Timestamp};

/// A row from the `transition_histories` table. Immutable.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransitionHistory {
    pub id: DbId,
    pub incident_id: DbId,
    pub transition_id: Option<DbId>,
    pub from_state_id: DbId,
    pub to_state_id: DbId,
    pub performed_by: Option<DbId>,
    pub comment: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for inserting a history row.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransitionHistory {
    pub incident_id: DbId,
    pub transition_id: DbId,
    pub from_state_id: DbId,
    pub to_state_id: DbId,
    pub performed_by: DbId,
    pub comment: Option<String>,
}

/// A row from the `comments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Comment {
    pub id: DbId,
    pub incident_id: DbId,
    pub author_id: Option<DbId>,
    pub body: String,
    pub is_internal: bool,
    pub transition_history_id: Option<DbId>,
    pub created_at: Timestamp,
}

/// DTO for inserting a comment.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateComment {
    pub incident_id: DbId,
    pub author_id: DbId,
    pub body: String,
    pub is_internal: bool,
    pub transition_history_id: Option<DbId>,
}

/// A row from the `feedbacks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Feedback {
    pub id: DbId,
    pub incident_id: DbId,
    pub transition_history_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for inserting feedback.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFeedback {
    pub incident_id: DbId,
    pub transition_history_id: DbId,
    pub user_id: DbId,
    pub rating: i16,
    pub comment: Option<String>,
}

/// A row from the `attachments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attachment {
    pub id: DbId,
    pub incident_id: DbId,
    pub transition_history_id: Option<DbId>,
    pub file_name: String,
    pub storage_key: String,
    pub created_at: Timestamp,
}

/// DTO for registering an uploaded file against an incident.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAttachment {
    pub incident_id: DbId,
    pub file_name: String,
    pub storage_key: String,
}
