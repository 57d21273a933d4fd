//! Postgres-backed collaborators.

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
use triage_db::models::workflow::{Transition, TransitionWithRelations, Workflow, WorkflowState};
use triage_db::repositories::{
    AttachmentRepo, CommentRepo, FeedbackRepo, IncidentRepo, RevisionRepo, TransitionHistoryRepo,
    TransitionRepo, UserRepo, WorkflowRepo, WorkflowStateRepo,
};
use triage_db::DbPool;

use crate::store::{IncidentStore, RevisionStore, StoreResult, UserDirectory, WorkflowStore};

/// Implements every store trait by delegating to the repositories.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn find_workflow(&self, id: DbId) -> StoreResult<Option<Workflow>> {
        Ok(WorkflowRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_default_workflow(&self, record_type: &str) -> StoreResult<Option<Workflow>> {
        Ok(WorkflowRepo::find_default(&self.pool, record_type).await?)
    }

    async fn initial_state(&self, workflow_id: DbId) -> StoreResult<Option<WorkflowState>> {
        Ok(WorkflowStateRepo::find_initial(&self.pool, workflow_id).await?)
    }

    async fn find_state(&self, id: DbId) -> StoreResult<Option<WorkflowState>> {
        Ok(WorkflowStateRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_transition(&self, id: DbId) -> StoreResult<Option<TransitionWithRelations>> {
        Ok(TransitionRepo::find_with_relations(&self.pool, id).await?)
    }

    async fn transitions_from_state(&self, state_id: DbId) -> StoreResult<Vec<Transition>> {
        Ok(TransitionRepo::list_from_state(&self.pool, state_id).await?)
    }

    async fn list_states(&self, workflow_id: DbId) -> StoreResult<Vec<WorkflowState>> {
        Ok(WorkflowStateRepo::list_for_workflow(&self.pool, workflow_id).await?)
    }

    async fn list_transitions(&self, workflow_id: DbId) -> StoreResult<Vec<Transition>> {
        Ok(TransitionRepo::list_for_workflow(&self.pool, workflow_id).await?)
    }
}

#[async_trait]
impl IncidentStore for PgStore {
    async fn find_incident(&self, id: DbId) -> StoreResult<Option<Incident>> {
        Ok(IncidentRepo::find_by_id(&self.pool, id).await?)
    }

    async fn create_incident(&self, input: &CreateIncident) -> StoreResult<Incident> {
        Ok(IncidentRepo::create(&self.pool, input).await?)
    }

    async fn commit_transition(
        &self,
        commit: &TransitionCommit,
    ) -> StoreResult<Option<TransitionHistory>> {
        Ok(IncidentRepo::commit_transition(&self.pool, commit).await?)
    }

    async fn update_fields(
        &self,
        id: DbId,
        patch: &IncidentPatch,
    ) -> StoreResult<Option<Incident>> {
        Ok(IncidentRepo::update_fields(&self.pool, id, patch).await?)
    }

    async fn apply_field_update(
        &self,
        id: DbId,
        update: &FieldUpdate,
    ) -> StoreResult<Option<Incident>> {
        Ok(IncidentRepo::apply_field_update(&self.pool, id, update).await?)
    }

    async fn link_attachments(
        &self,
        incident_id: DbId,
        history_id: DbId,
        attachment_ids: &[DbId],
    ) -> StoreResult<u64> {
        Ok(
            AttachmentRepo::link_to_transition(&self.pool, incident_id, history_id, attachment_ids)
                .await?,
        )
    }

    async fn create_comment(&self, input: &CreateComment) -> StoreResult<Comment> {
        Ok(CommentRepo::create(&self.pool, input).await?)
    }

    async fn create_feedback(&self, input: &CreateFeedback) -> StoreResult<Feedback> {
        Ok(FeedbackRepo::create(&self.pool, input).await?)
    }

    async fn find_comment(&self, id: DbId) -> StoreResult<Option<Comment>> {
        Ok(CommentRepo::find_by_id(&self.pool, id).await?)
    }

    async fn update_comment(&self, id: DbId, body: &str) -> StoreResult<Option<Comment>> {
        Ok(CommentRepo::update_body(&self.pool, id, body).await?)
    }

    async fn delete_comment(&self, id: DbId) -> StoreResult<Option<Comment>> {
        Ok(CommentRepo::delete(&self.pool, id).await?)
    }

    async fn create_attachment(&self, input: &CreateAttachment) -> StoreResult<Attachment> {
        Ok(AttachmentRepo::create(&self.pool, input).await?)
    }

    async fn delete_attachment(&self, id: DbId) -> StoreResult<Option<Attachment>> {
        Ok(AttachmentRepo::delete(&self.pool, id).await?)
    }

    async fn mark_converted(&self, id: DbId, request_id: DbId) -> StoreResult<Option<Incident>> {
        Ok(IncidentRepo::mark_converted(&self.pool, id, request_id).await?)
    }

    async fn list_assignees(&self, incident_id: DbId) -> StoreResult<Vec<DbId>> {
        Ok(IncidentRepo::list_assignees(&self.pool, incident_id).await?)
    }

    async fn list_history(&self, incident_id: DbId) -> StoreResult<Vec<TransitionHistory>> {
        Ok(TransitionHistoryRepo::list_for_incident(&self.pool, incident_id).await?)
    }

    async fn find_sla_overdue(&self, now: Timestamp) -> StoreResult<Vec<Incident>> {
        Ok(IncidentRepo::find_sla_overdue(&self.pool, now).await?)
    }

    async fn mark_sla_breached(&self, ids: &[DbId]) -> StoreResult<u64> {
        Ok(IncidentRepo::mark_sla_breached(&self.pool, ids).await?)
    }

    async fn sla_statistics(&self) -> StoreResult<SlaStatistics> {
        Ok(IncidentRepo::sla_statistics(&self.pool).await?)
    }
}

#[async_trait]
impl RevisionStore for PgStore {
    async fn append_revision(&self, input: &CreateRevision) -> StoreResult<Revision> {
        Ok(RevisionRepo::append(&self.pool, input).await?)
    }

    async fn list_revisions(&self, incident_id: DbId) -> StoreResult<Vec<Revision>> {
        Ok(RevisionRepo::list_for_incident(&self.pool, incident_id).await?)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, id: DbId) -> StoreResult<Option<User>> {
        Ok(UserRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_matching(&self, query: &UserMatchQuery) -> StoreResult<Vec<User>> {
        Ok(UserRepo::find_matching(&self.pool, query).await?)
    }

    async fn find_by_role_code(&self, code: &str) -> StoreResult<Vec<User>> {
        Ok(UserRepo::list_by_role_code(&self.pool, code).await?)
    }
}
