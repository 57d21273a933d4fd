//! Collaborator traits the workflow core depends on.
//!
//! Each trait is object safe and consumed as `Arc<dyn Trait>`, so the
//! engine can run against Postgres ([`crate::pg::PgStore`]) or the
//! in-process [`crate::memory::MemoryStore`].

use std::sync::Arc;

use async_trait::async_trait;
use triage_core::action::FieldUpdate;
use triage_core::types::{DbId, Timestamp};
use triage_db::models::history::{
    Attachment, Comment, CreateAttachment, CreateComment, CreateFeedback, Feedback,
    TransitionHistory,
};
use triage_db::models::incident::{
    CreateIncident, Incident, IncidentPatch, SlaStatistics, TransitionCommit,
};
use triage_db::models::revision::{CreateRevision, Revision};
use triage_db::models::user::{User, UserMatchQuery};
use triage_db::models::workflow::{
    Transition, TransitionWithRelations, Workflow, WorkflowState,
};

use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A non-SQL backend could not serve the call.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read access to workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find_workflow(&self, id: DbId) -> StoreResult<Option<Workflow>>;

    /// The active default workflow for a record type.
    async fn find_default_workflow(&self, record_type: &str) -> StoreResult<Option<Workflow>>;

    async fn initial_state(&self, workflow_id: DbId) -> StoreResult<Option<WorkflowState>>;

    async fn find_state(&self, id: DbId) -> StoreResult<Option<WorkflowState>>;

    /// A transition with its requirements and actions in declaration order.
    async fn find_transition(&self, id: DbId) -> StoreResult<Option<TransitionWithRelations>>;

    /// Transitions leaving a state, active or not, by id.
    async fn transitions_from_state(&self, state_id: DbId) -> StoreResult<Vec<Transition>>;

    async fn list_states(&self, workflow_id: DbId) -> StoreResult<Vec<WorkflowState>>;

    async fn list_transitions(&self, workflow_id: DbId) -> StoreResult<Vec<Transition>>;
}

/// Incident records and the rows they own.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn find_incident(&self, id: DbId) -> StoreResult<Option<Incident>>;

    async fn create_incident(&self, input: &CreateIncident) -> StoreResult<Incident>;

    /// Apply a transition's update and insert its history row atomically.
    ///
    /// The update applies only while the incident is still in
    /// `commit.expected_state_id`; otherwise nothing is written and `None`
    /// is returned.
    async fn commit_transition(
        &self,
        commit: &TransitionCommit,
    ) -> StoreResult<Option<TransitionHistory>>;

    async fn update_fields(&self, id: DbId, patch: &IncidentPatch)
        -> StoreResult<Option<Incident>>;

    async fn apply_field_update(
        &self,
        id: DbId,
        update: &FieldUpdate,
    ) -> StoreResult<Option<Incident>>;

    /// Link the incident's attachments to a history row; returns rows linked.
    async fn link_attachments(
        &self,
        incident_id: DbId,
        history_id: DbId,
        attachment_ids: &[DbId],
    ) -> StoreResult<u64>;

    async fn create_comment(&self, input: &CreateComment) -> StoreResult<Comment>;

    async fn create_feedback(&self, input: &CreateFeedback) -> StoreResult<Feedback>;

    async fn find_comment(&self, id: DbId) -> StoreResult<Option<Comment>>;

    async fn update_comment(&self, id: DbId, body: &str) -> StoreResult<Option<Comment>>;

    /// Remove a comment, returning the deleted row.
    async fn delete_comment(&self, id: DbId) -> StoreResult<Option<Comment>>;

    async fn create_attachment(&self, input: &CreateAttachment) -> StoreResult<Attachment>;

    /// Remove an attachment, returning the deleted row.
    async fn delete_attachment(&self, id: DbId) -> StoreResult<Option<Attachment>>;

    /// Record the request an incident was converted into.
    async fn mark_converted(&self, id: DbId, request_id: DbId) -> StoreResult<Option<Incident>>;

    async fn list_assignees(&self, incident_id: DbId) -> StoreResult<Vec<DbId>>;

    async fn list_history(&self, incident_id: DbId) -> StoreResult<Vec<TransitionHistory>>;

    /// Open, unflagged incidents whose deadline is before `now`.
    async fn find_sla_overdue(&self, now: Timestamp) -> StoreResult<Vec<Incident>>;

    /// Flag incidents breached; already-flagged ids are skipped.
    async fn mark_sla_breached(&self, ids: &[DbId]) -> StoreResult<u64>;

    async fn sla_statistics(&self) -> StoreResult<SlaStatistics>;
}

/// The append-only revision log.
#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Append a revision numbered one past the incident's current maximum.
    /// Implementations serialize concurrent appends per incident.
    async fn append_revision(&self, input: &CreateRevision) -> StoreResult<Revision>;

    async fn list_revisions(&self, incident_id: DbId) -> StoreResult<Vec<Revision>>;
}

/// Read access to users and role membership.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: DbId) -> StoreResult<Option<User>>;

    /// Active role members matching every supplied filter, by id.
    async fn find_matching(&self, query: &UserMatchQuery) -> StoreResult<Vec<User>>;

    /// Active members of the role with this code, by id.
    async fn find_by_role_code(&self, code: &str) -> StoreResult<Vec<User>>;
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Everything the workflow services are built from.
#[derive(Clone)]
pub struct Collaborators {
    pub workflows: Arc<dyn WorkflowStore>,
    pub incidents: Arc<dyn IncidentStore>,
    pub revisions: Arc<dyn RevisionStore>,
    pub users: Arc<dyn UserDirectory>,
    pub transport: Arc<dyn Transport>,
}

impl Collaborators {
    /// Use one backend for every store trait.
    pub fn from_store<S>(store: Arc<S>, transport: Arc<dyn Transport>) -> Self
    where
        S: WorkflowStore + IncidentStore + RevisionStore + UserDirectory + 'static,
    {
        Self {
            workflows: store.clone(),
            incidents: store.clone(),
            revisions: store.clone(),
            users: store,
            transport,
        }
    }
}
