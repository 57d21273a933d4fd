//! Repositories for the records hanging off a transition: history rows,
//! comments, feedback and attachment links.

use sqlx::PgPool;
use triage_core::types::DbId;

use crate::models::history::{
    Attachment, Comment, CreateAttachment, CreateComment, CreateFeedback,
    CreateTransitionHistory, Feedback, TransitionHistory,
};

/// Column list for `transition_histories`.
const HISTORY_COLUMNS: &str =
    "id, incident_id, transition_id, from_state_id, to_state_id, performed_by, comment, created_at";

/// Column list for `comments`.
const COMMENT_COLUMNS: &str =
    "id, incident_id, author_id, body, is_internal, transition_history_id, created_at";

/// Column list for `attachments`.
const ATTACHMENT_COLUMNS: &str =
    "id, incident_id, transition_history_id, file_name, storage_key, created_at";

/// Column list for `feedbacks`.
const FEEDBACK_COLUMNS: &str =
    "id, incident_id, transition_history_id, user_id, rating, comment, created_at";

// ---------------------------------------------------------------------------
// Transition history
// ---------------------------------------------------------------------------

/// Append-only access to `transition_histories`.
pub struct TransitionHistoryRepo;

impl TransitionHistoryRepo {
    /// Insert a history row outside a transition commit (imports, repairs).
    pub async fn create(
        pool: &PgPool,
        input: &CreateTransitionHistory,
    ) -> Result<TransitionHistory, sqlx::Error> {
        let query = format!(
            "INSERT INTO transition_histories
                (incident_id, transition_id, from_state_id, to_state_id, performed_by, comment)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {HISTORY_COLUMNS}"
        );
        sqlx::query_as::<_, TransitionHistory>(&query)
            .bind(input.incident_id)
            .bind(input.transition_id)
            .bind(input.from_state_id)
            .bind(input.to_state_id)
            .bind(input.performed_by)
            .bind(&input.comment)
            .fetch_one(pool)
            .await
    }

    /// History of an incident, oldest first.
    pub async fn list_for_incident(
        pool: &PgPool,
        incident_id: DbId,
    ) -> Result<Vec<TransitionHistory>, sqlx::Error> {
        let query = format!(
            "SELECT {HISTORY_COLUMNS} FROM transition_histories
             WHERE incident_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, TransitionHistory>(&query)
            .bind(incident_id)
            .fetch_all(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

pub struct CommentRepo;

impl CommentRepo {
    pub async fn create(pool: &PgPool, input: &CreateComment) -> Result<Comment, sqlx::Error> {
        let query = format!(
            "INSERT INTO comments (incident_id, author_id, body, is_internal, transition_history_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COMMENT_COLUMNS}"
        );
        sqlx::query_as::<_, Comment>(&query)
            .bind(input.incident_id)
            .bind(input.author_id)
            .bind(&input.body)
            .bind(input.is_internal)
            .bind(input.transition_history_id)
            .fetch_one(pool)
            .await
    }

    pub async fn list_for_incident(
        pool: &PgPool,
        incident_id: DbId,
    ) -> Result<Vec<Comment>, sqlx::Error> {
        let query = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE incident_id = $1 ORDER BY created_at, id"
        );
        sqlx::query_as::<_, Comment>(&query)
            .bind(incident_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Comment>, sqlx::Error> {
        let query = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
        sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Replace a comment's body. Returns `None` if the comment does not exist.
    pub async fn update_body(
        pool: &PgPool,
        id: DbId,
        body: &str,
    ) -> Result<Option<Comment>, sqlx::Error> {
        let query = format!("UPDATE comments SET body = $2 WHERE id = $1 RETURNING {COMMENT_COLUMNS}");
        sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .bind(body)
            .fetch_optional(pool)
            .await
    }

    /// Delete a comment, returning the removed row.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<Option<Comment>, sqlx::Error> {
        let query = format!("DELETE FROM comments WHERE id = $1 RETURNING {COMMENT_COLUMNS}");
        sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

pub struct FeedbackRepo;

impl FeedbackRepo {
    pub async fn create(pool: &PgPool, input: &CreateFeedback) -> Result<Feedback, sqlx::Error> {
        let query = format!(
            "INSERT INTO feedbacks (incident_id, transition_history_id, user_id, rating, comment)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {FEEDBACK_COLUMNS}"
        );
        sqlx::query_as::<_, Feedback>(&query)
            .bind(input.incident_id)
            .bind(input.transition_history_id)
            .bind(input.user_id)
            .bind(input.rating)
            .bind(&input.comment)
            .fetch_one(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Attachment metadata. File contents live in external storage under
/// `storage_key`.
pub struct AttachmentRepo;

impl AttachmentRepo {
    pub async fn create(
        pool: &PgPool,
        input: &CreateAttachment,
    ) -> Result<Attachment, sqlx::Error> {
        let query = format!(
            "INSERT INTO attachments (incident_id, file_name, storage_key)
             VALUES ($1, $2, $3)
             RETURNING {ATTACHMENT_COLUMNS}"
        );
        sqlx::query_as::<_, Attachment>(&query)
            .bind(input.incident_id)
            .bind(&input.file_name)
            .bind(&input.storage_key)
            .fetch_one(pool)
            .await
    }

    /// Delete an attachment row, returning it.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<Option<Attachment>, sqlx::Error> {
        let query = format!("DELETE FROM attachments WHERE id = $1 RETURNING {ATTACHMENT_COLUMNS}");
        sqlx::query_as::<_, Attachment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Link the incident's attachments with the given ids to a history row.
    /// Ids belonging to other incidents are ignored. Returns rows linked.
    pub async fn link_to_transition(
        pool: &PgPool,
        incident_id: DbId,
        history_id: DbId,
        attachment_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if attachment_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE attachments SET transition_history_id = $2
             WHERE incident_id = $1 AND id = ANY($3)",
        )
        .bind(incident_id)
        .bind(history_id)
        .bind(attachment_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
