//! In-process implementations of every collaborator trait.
//!
//! [`MemoryStore`] mirrors the Postgres repositories' semantics (conditional
//! transition commit, serialized revision numbering, idempotent breach
//! marking) behind a single mutex. [`RecordingTransport`] captures outbound
//! messages instead of sending them. Both back the crate's tests and suit
//! embedding the engine without a database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use triage_core::action::FieldUpdate;
use triage_core::incident::format_incident_number;
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
    CreateTransition, CreateTransitionAction, CreateTransitionRequirement, CreateWorkflow,
    CreateWorkflowState, Transition, TransitionAction, TransitionRequirement,
    TransitionWithRelations, Workflow, WorkflowState,
};
use triage_events::WebhookRequest;

use crate::store::{
    IncidentStore, RevisionStore, StoreError, StoreResult, UserDirectory, WorkflowStore,
};
use crate::transport::{EmailMessage, NotificationMessage, Transport, TransportError};

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailPoint {
    CreateComment,
    CreateFeedback,
    LinkAttachments,
    AppendRevision,
    SlaStatistics,
    /// `commit_transition` behaves as if another writer moved the incident.
    StaleCommit,
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryData {
    next_id: DbId,
    incident_seq: i64,
    workflows: BTreeMap<DbId, Workflow>,
    states: BTreeMap<DbId, WorkflowState>,
    transitions: BTreeMap<DbId, Transition>,
    requirements: Vec<TransitionRequirement>,
    actions: Vec<TransitionAction>,
    roles: BTreeMap<String, DbId>,
    users: BTreeMap<DbId, User>,
    user_roles: BTreeSet<(DbId, DbId)>,
    user_classifications: BTreeSet<(DbId, DbId)>,
    incidents: BTreeMap<DbId, Incident>,
    assignees: BTreeMap<DbId, BTreeSet<DbId>>,
    histories: Vec<TransitionHistory>,
    comments: Vec<Comment>,
    feedbacks: Vec<Feedback>,
    attachments: BTreeMap<DbId, Attachment>,
    revisions: Vec<Revision>,
    failures: BTreeSet<FailPoint>,
}

impl MemoryData {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.failures.contains(&point) {
            return Err(StoreError::Unavailable(format!("injected failure: {point:?}")));
        }
        Ok(())
    }

    /// A direct assignee write leaves the new primary as the only assignee.
    fn reset_assignees(&mut self, incident_id: DbId, assignee_id: Option<DbId>) {
        match assignee_id {
            Some(id) => {
                self.assignees.insert(incident_id, BTreeSet::from([id]));
            }
            None => {
                self.assignees.remove(&incident_id);
            }
        }
    }
}

/// Everything in one mutex; no lock is held across an await.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, MemoryData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- failure injection --------------------------------------------------

    pub fn fail_on(&self, point: FailPoint) {
        self.data().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.data().failures.clear();
    }

    // -- definitions --------------------------------------------------------

    pub fn add_workflow(&self, input: &CreateWorkflow) -> Workflow {
        let mut data = self.data();
        let now = Utc::now();
        let workflow = Workflow {
            id: data.next_id(),
            name: input.name.clone(),
            code: input.code.clone(),
            record_type: input.record_type.clone(),
            required_fields: input
                .required_fields
                .clone()
                .unwrap_or_else(|| serde_json::json!([])),
            is_active: true,
            is_default: input.is_default.unwrap_or(false),
            version: 1,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        data.workflows.insert(workflow.id, workflow.clone());
        workflow
    }

    pub fn add_state(&self, input: &CreateWorkflowState) -> WorkflowState {
        let mut data = self.data();
        let state = WorkflowState {
            id: data.next_id(),
            workflow_id: input.workflow_id,
            name: input.name.clone(),
            code: input.code.clone(),
            state_type: input.state_type.clone(),
            sla_hours: input.sla_hours,
            viewable_role_ids: input.viewable_role_ids.clone(),
            created_at: Utc::now(),
        };
        data.states.insert(state.id, state.clone());
        state
    }

    pub fn add_transition(&self, input: &CreateTransition) -> Transition {
        let mut data = self.data();
        let now = Utc::now();
        let transition = Transition {
            id: data.next_id(),
            workflow_id: input.workflow_id,
            name: input.name.clone(),
            from_state_id: input.from_state_id,
            to_state_id: input.to_state_id,
            is_active: true,
            allowed_role_ids: input.allowed_role_ids.clone(),
            assign_user_id: input.assign_user_id,
            assignment_role_id: input.assignment_role_id,
            manual_select_user: input.manual_select_user,
            auto_match_user: input.auto_match_user,
            assign_department_id: input.assign_department_id,
            auto_detect_department: input.auto_detect_department,
            created_at: now,
            updated_at: now,
        };
        data.transitions.insert(transition.id, transition.clone());
        transition
    }

    pub fn set_transition_active(&self, transition_id: DbId, is_active: bool) {
        if let Some(t) = self.data().transitions.get_mut(&transition_id) {
            t.is_active = is_active;
        }
    }

    pub fn add_requirement(&self, input: &CreateTransitionRequirement) -> TransitionRequirement {
        let mut data = self.data();
        let requirement = TransitionRequirement {
            id: data.next_id(),
            transition_id: input.transition_id,
            requirement_type: input.requirement_type.clone(),
            is_mandatory: input.is_mandatory,
            error_message: input.error_message.clone(),
            sort_order: input.sort_order.unwrap_or(0),
        };
        data.requirements.push(requirement.clone());
        requirement
    }

    pub fn add_action(&self, input: &CreateTransitionAction) -> TransitionAction {
        let mut data = self.data();
        let action = TransitionAction {
            id: data.next_id(),
            transition_id: input.transition_id,
            name: input.name.clone().unwrap_or_default(),
            action_type: input.action_type.clone(),
            config: input.config.clone(),
            execution_order: input.execution_order.unwrap_or(0),
            is_async: input.is_async.unwrap_or(false),
            is_active: true,
        };
        data.actions.push(action.clone());
        action
    }

    // -- directory ----------------------------------------------------------

    pub fn add_role(&self, code: &str) -> DbId {
        let mut data = self.data();
        if let Some(id) = data.roles.get(code) {
            return *id;
        }
        let id = data.next_id();
        data.roles.insert(code.to_string(), id);
        id
    }

    pub fn add_user(
        &self,
        username: &str,
        department_id: Option<DbId>,
        location_id: Option<DbId>,
    ) -> User {
        let mut data = self.data();
        let now = Utc::now();
        let user = User {
            id: data.next_id(),
            username: username.to_string(),
            full_name: String::new(),
            email: format!("{username}@example.com"),
            is_active: true,
            department_id,
            location_id,
            created_at: now,
            updated_at: now,
        };
        data.users.insert(user.id, user.clone());
        user
    }

    pub fn set_user_active(&self, user_id: DbId, is_active: bool) {
        if let Some(u) = self.data().users.get_mut(&user_id) {
            u.is_active = is_active;
        }
    }

    pub fn grant_role(&self, user_id: DbId, role_id: DbId) {
        self.data().user_roles.insert((user_id, role_id));
    }

    pub fn grant_classification(&self, user_id: DbId, classification_id: DbId) {
        self.data()
            .user_classifications
            .insert((user_id, classification_id));
    }

    // -- incident-owned rows ------------------------------------------------

    /// Register an uploaded attachment not yet linked to a transition.
    pub fn add_attachment(&self, incident_id: DbId) -> DbId {
        let mut data = self.data();
        let id = data.next_id();
        data.attachments.insert(
            id,
            Attachment {
                id,
                incident_id,
                transition_history_id: None,
                file_name: format!("upload-{id}.bin"),
                storage_key: format!("attachments/{id}"),
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn attachments(&self, incident_id: DbId) -> Vec<Attachment> {
        self.data()
            .attachments
            .values()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect()
    }

    /// The history row an attachment is linked to, if any.
    pub fn attachment_link(&self, attachment_id: DbId) -> Option<DbId> {
        self.data()
            .attachments
            .get(&attachment_id)
            .and_then(|a| a.transition_history_id)
    }

    /// Overwrite an incident row as-is.
    pub fn put_incident(&self, incident: Incident) {
        self.data().incidents.insert(incident.id, incident);
    }

    pub fn incident(&self, id: DbId) -> Option<Incident> {
        self.data().incidents.get(&id).cloned()
    }

    pub fn comments(&self, incident_id: DbId) -> Vec<Comment> {
        self.data()
            .comments
            .iter()
            .filter(|c| c.incident_id == incident_id)
            .cloned()
            .collect()
    }

    pub fn feedbacks(&self, incident_id: DbId) -> Vec<Feedback> {
        self.data()
            .feedbacks
            .iter()
            .filter(|f| f.incident_id == incident_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn find_workflow(&self, id: DbId) -> StoreResult<Option<Workflow>> {
        Ok(self
            .data()
            .workflows
            .get(&id)
            .filter(|w| w.deleted_at.is_none())
            .cloned())
    }

    async fn find_default_workflow(&self, record_type: &str) -> StoreResult<Option<Workflow>> {
        Ok(self
            .data()
            .workflows
            .values()
            .filter(|w| {
                w.record_type == record_type && w.is_default && w.is_active && w.deleted_at.is_none()
            })
            .max_by_key(|w| (w.version, w.id))
            .cloned())
    }

    async fn initial_state(&self, workflow_id: DbId) -> StoreResult<Option<WorkflowState>> {
        Ok(self
            .data()
            .states
            .values()
            .find(|s| s.workflow_id == workflow_id && s.state_type == "initial")
            .cloned())
    }

    async fn find_state(&self, id: DbId) -> StoreResult<Option<WorkflowState>> {
        Ok(self.data().states.get(&id).cloned())
    }

    async fn find_transition(&self, id: DbId) -> StoreResult<Option<TransitionWithRelations>> {
        let data = self.data();
        let Some(transition) = data.transitions.get(&id).cloned() else {
            return Ok(None);
        };
        let mut requirements: Vec<_> = data
            .requirements
            .iter()
            .filter(|r| r.transition_id == id)
            .cloned()
            .collect();
        requirements.sort_by_key(|r| (r.sort_order, r.id));
        let mut actions: Vec<_> = data
            .actions
            .iter()
            .filter(|a| a.transition_id == id)
            .cloned()
            .collect();
        actions.sort_by_key(|a| (a.execution_order, a.id));
        Ok(Some(TransitionWithRelations {
            transition,
            requirements,
            actions,
        }))
    }

    async fn transitions_from_state(&self, state_id: DbId) -> StoreResult<Vec<Transition>> {
        Ok(self
            .data()
            .transitions
            .values()
            .filter(|t| t.from_state_id == state_id)
            .cloned()
            .collect())
    }

    async fn list_states(&self, workflow_id: DbId) -> StoreResult<Vec<WorkflowState>> {
        Ok(self
            .data()
            .states
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn list_transitions(&self, workflow_id: DbId) -> StoreResult<Vec<Transition>> {
        Ok(self
            .data()
            .transitions
            .values()
            .filter(|t| t.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn find_incident(&self, id: DbId) -> StoreResult<Option<Incident>> {
        Ok(self.data().incidents.get(&id).cloned())
    }

    async fn create_incident(&self, input: &CreateIncident) -> StoreResult<Incident> {
        let mut data = self.data();
        data.incident_seq += 1;
        let now = Utc::now();
        let incident = Incident {
            id: data.next_id(),
            incident_number: format_incident_number(data.incident_seq),
            title: input.title.clone(),
            description: input.description.clone(),
            workflow_id: input.workflow_id,
            current_state_id: input.current_state_id,
            priority: input.priority,
            severity: input.severity,
            classification_id: input.classification_id,
            location_id: input.location_id,
            department_id: input.department_id,
            assignee_id: input.assignee_id,
            reporter_id: input.reporter_id,
            custom_fields: input.custom_fields.clone(),
            sla_deadline: input.sla_deadline,
            sla_breached: false,
            resolved_at: None,
            closed_at: None,
            converted_request_id: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(assignee_id) = incident.assignee_id {
            data.assignees
                .entry(incident.id)
                .or_default()
                .insert(assignee_id);
        }
        data.incidents.insert(incident.id, incident.clone());
        Ok(incident)
    }

    async fn commit_transition(
        &self,
        commit: &TransitionCommit,
    ) -> StoreResult<Option<TransitionHistory>> {
        let mut data = self.data();
        if data.failures.contains(&FailPoint::StaleCommit) {
            return Ok(None);
        }
        let update = &commit.update;
        let Some(incident) = data.incidents.get_mut(&commit.incident_id) else {
            return Ok(None);
        };
        if incident.current_state_id != commit.expected_state_id {
            return Ok(None);
        }

        incident.current_state_id = update.to_state_id;
        if let Some(department_id) = update.department_id {
            incident.department_id = Some(department_id);
        }
        if let Some(assignee_id) = update.assignee_id {
            incident.assignee_id = Some(assignee_id);
        }
        if let Some(deadline) = update.sla_deadline {
            incident.sla_deadline = Some(deadline);
            incident.sla_breached = false;
        }
        if let Some(closed_at) = update.closed_at {
            incident.closed_at = Some(closed_at);
        }
        if let Some(resolved_at) = update.resolved_at {
            incident.resolved_at = Some(resolved_at);
        }
        incident.updated_at = update.updated_at;

        if let Some(ids) = &update.assignee_ids {
            data.assignees
                .insert(commit.incident_id, ids.iter().copied().collect());
        }

        let history = TransitionHistory {
            id: data.next_id(),
            incident_id: commit.history.incident_id,
            transition_id: Some(commit.history.transition_id),
            from_state_id: commit.history.from_state_id,
            to_state_id: commit.history.to_state_id,
            performed_by: Some(commit.history.performed_by),
            comment: commit.history.comment.clone(),
            created_at: update.updated_at,
        };
        data.histories.push(history.clone());
        Ok(Some(history))
    }

    async fn update_fields(
        &self,
        id: DbId,
        patch: &IncidentPatch,
    ) -> StoreResult<Option<Incident>> {
        let mut data = self.data();
        let Some(incident) = data.incidents.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = &patch.title {
            incident.title = title.clone();
        }
        if let Some(description) = &patch.description {
            incident.description = description.clone();
        }
        if let Some(priority) = patch.priority {
            incident.priority = priority;
        }
        if let Some(severity) = patch.severity {
            incident.severity = severity;
        }
        if patch.classification_id.is_some() {
            incident.classification_id = patch.classification_id;
        }
        if patch.location_id.is_some() {
            incident.location_id = patch.location_id;
        }
        if patch.department_id.is_some() {
            incident.department_id = patch.department_id;
        }
        if patch.assignee_id.is_some() {
            incident.assignee_id = patch.assignee_id;
        }
        if let Some(custom_fields) = &patch.custom_fields {
            incident.custom_fields = custom_fields.clone();
        }
        incident.updated_at = Utc::now();
        let updated = incident.clone();
        if patch.assignee_id.is_some() {
            data.reset_assignees(id, patch.assignee_id);
        }
        Ok(Some(updated))
    }

    async fn apply_field_update(
        &self,
        id: DbId,
        update: &FieldUpdate,
    ) -> StoreResult<Option<Incident>> {
        let mut data = self.data();
        let Some(incident) = data.incidents.get_mut(&id) else {
            return Ok(None);
        };
        match *update {
            FieldUpdate::Priority(v) => incident.priority = v,
            FieldUpdate::Severity(v) => incident.severity = v,
            FieldUpdate::AssigneeId(v) => incident.assignee_id = v,
            FieldUpdate::DepartmentId(v) => incident.department_id = v,
        }
        incident.updated_at = Utc::now();
        let updated = incident.clone();
        if let FieldUpdate::AssigneeId(assignee_id) = *update {
            data.reset_assignees(id, assignee_id);
        }
        Ok(Some(updated))
    }

    async fn link_attachments(
        &self,
        incident_id: DbId,
        history_id: DbId,
        attachment_ids: &[DbId],
    ) -> StoreResult<u64> {
        let mut data = self.data();
        data.check(FailPoint::LinkAttachments)?;
        let mut linked = 0;
        for id in attachment_ids {
            if let Some(row) = data.attachments.get_mut(id) {
                if row.incident_id == incident_id {
                    row.transition_history_id = Some(history_id);
                    linked += 1;
                }
            }
        }
        Ok(linked)
    }

    async fn create_comment(&self, input: &CreateComment) -> StoreResult<Comment> {
        let mut data = self.data();
        data.check(FailPoint::CreateComment)?;
        let comment = Comment {
            id: data.next_id(),
            incident_id: input.incident_id,
            author_id: Some(input.author_id),
            body: input.body.clone(),
            is_internal: input.is_internal,
            transition_history_id: input.transition_history_id,
            created_at: Utc::now(),
        };
        data.comments.push(comment.clone());
        Ok(comment)
    }

    async fn find_comment(&self, id: DbId) -> StoreResult<Option<Comment>> {
        Ok(self.data().comments.iter().find(|c| c.id == id).cloned())
    }

    async fn update_comment(&self, id: DbId, body: &str) -> StoreResult<Option<Comment>> {
        let mut data = self.data();
        Ok(data.comments.iter_mut().find(|c| c.id == id).map(|comment| {
            comment.body = body.to_string();
            comment.clone()
        }))
    }

    async fn delete_comment(&self, id: DbId) -> StoreResult<Option<Comment>> {
        let mut data = self.data();
        let position = data.comments.iter().position(|c| c.id == id);
        Ok(position.map(|i| data.comments.remove(i)))
    }

    async fn create_attachment(&self, input: &CreateAttachment) -> StoreResult<Attachment> {
        let mut data = self.data();
        let attachment = Attachment {
            id: data.next_id(),
            incident_id: input.incident_id,
            transition_history_id: None,
            file_name: input.file_name.clone(),
            storage_key: input.storage_key.clone(),
            created_at: Utc::now(),
        };
        data.attachments.insert(attachment.id, attachment.clone());
        Ok(attachment)
    }

    async fn delete_attachment(&self, id: DbId) -> StoreResult<Option<Attachment>> {
        Ok(self.data().attachments.remove(&id))
    }

    async fn mark_converted(&self, id: DbId, request_id: DbId) -> StoreResult<Option<Incident>> {
        let mut data = self.data();
        Ok(data.incidents.get_mut(&id).map(|incident| {
            incident.converted_request_id = Some(request_id);
            incident.updated_at = Utc::now();
            incident.clone()
        }))
    }

    async fn create_feedback(&self, input: &CreateFeedback) -> StoreResult<Feedback> {
        let mut data = self.data();
        data.check(FailPoint::CreateFeedback)?;
        let feedback = Feedback {
            id: data.next_id(),
            incident_id: input.incident_id,
            transition_history_id: Some(input.transition_history_id),
            user_id: Some(input.user_id),
            rating: input.rating,
            comment: input.comment.clone(),
            created_at: Utc::now(),
        };
        data.feedbacks.push(feedback.clone());
        Ok(feedback)
    }

    async fn list_assignees(&self, incident_id: DbId) -> StoreResult<Vec<DbId>> {
        Ok(self
            .data()
            .assignees
            .get(&incident_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn list_history(&self, incident_id: DbId) -> StoreResult<Vec<TransitionHistory>> {
        Ok(self
            .data()
            .histories
            .iter()
            .filter(|h| h.incident_id == incident_id)
            .cloned()
            .collect())
    }

    async fn find_sla_overdue(&self, now: Timestamp) -> StoreResult<Vec<Incident>> {
        let mut overdue: Vec<Incident> = self
            .data()
            .incidents
            .values()
            .filter(|i| {
                !i.sla_breached && i.closed_at.is_none() && i.sla_deadline.is_some_and(|d| d < now)
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|i| (i.sla_deadline, i.id));
        Ok(overdue)
    }

    async fn mark_sla_breached(&self, ids: &[DbId]) -> StoreResult<u64> {
        let mut data = self.data();
        let now = Utc::now();
        let mut marked = 0;
        for id in ids {
            if let Some(incident) = data.incidents.get_mut(id) {
                if !incident.sla_breached {
                    incident.sla_breached = true;
                    incident.updated_at = now;
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }

    async fn sla_statistics(&self) -> StoreResult<SlaStatistics> {
        let data = self.data();
        data.check(FailPoint::SlaStatistics)?;
        let mut stats = SlaStatistics::default();
        for incident in data.incidents.values().filter(|i| i.closed_at.is_none()) {
            match data
                .states
                .get(&incident.current_state_id)
                .map(|s| s.state_type.as_str())
            {
                Some("initial") => stats.open += 1,
                Some("normal") => stats.in_progress += 1,
                _ => {}
            }
            if incident.sla_breached {
                stats.breached += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl RevisionStore for MemoryStore {
    async fn append_revision(&self, input: &CreateRevision) -> StoreResult<Revision> {
        let mut data = self.data();
        data.check(FailPoint::AppendRevision)?;
        if !data.incidents.contains_key(&input.incident_id) {
            return Err(StoreError::Database(sqlx::Error::RowNotFound));
        }
        let revision_number = data
            .revisions
            .iter()
            .filter(|r| r.incident_id == input.incident_id)
            .map(|r| r.revision_number)
            .max()
            .unwrap_or(0)
            + 1;
        let revision = Revision {
            id: data.next_id(),
            incident_id: input.incident_id,
            revision_number,
            action_type: input.action_type.clone(),
            description: input.description.clone(),
            changes: input.changes.clone(),
            performed_by: input.performed_by,
            created_at: Utc::now(),
        };
        data.revisions.push(revision.clone());
        Ok(revision)
    }

    async fn list_revisions(&self, incident_id: DbId) -> StoreResult<Vec<Revision>> {
        let mut revisions: Vec<Revision> = self
            .data()
            .revisions
            .iter()
            .filter(|r| r.incident_id == incident_id)
            .cloned()
            .collect();
        revisions.sort_by_key(|r| r.revision_number);
        Ok(revisions)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, id: DbId) -> StoreResult<Option<User>> {
        Ok(self.data().users.get(&id).cloned())
    }

    async fn find_matching(&self, query: &UserMatchQuery) -> StoreResult<Vec<User>> {
        let data = self.data();
        Ok(data
            .users
            .values()
            .filter(|u| u.is_active)
            .filter(|u| data.user_roles.contains(&(u.id, query.role_id)))
            .filter(|u| {
                query
                    .classification_id
                    .is_none_or(|c| data.user_classifications.contains(&(u.id, c)))
            })
            .filter(|u| query.location_id.is_none_or(|l| u.location_id == Some(l)))
            .filter(|u| query.department_id.is_none_or(|d| u.department_id == Some(d)))
            .filter(|u| query.exclude_user_id != Some(u.id))
            .cloned()
            .collect())
    }

    async fn find_by_role_code(&self, code: &str) -> StoreResult<Vec<User>> {
        let data = self.data();
        let Some(role_id) = data.roles.get(code).copied() else {
            return Ok(Vec::new());
        };
        Ok(data
            .users
            .values()
            .filter(|u| u.is_active && data.user_roles.contains(&(u.id, role_id)))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorded {
    notifications: Vec<NotificationMessage>,
    emails: Vec<EmailMessage>,
    webhooks: Vec<WebhookRequest>,
}

/// Transport that records every message and answers webhooks with a
/// configurable status and delay.
pub struct RecordingTransport {
    recorded: Mutex<Recorded>,
    webhook_status: AtomicU16,
    webhook_delay: Mutex<Option<Duration>>,
    fail_emails: AtomicBool,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            recorded: Mutex::new(Recorded::default()),
            webhook_status: AtomicU16::new(200),
            webhook_delay: Mutex::new(None),
            fail_emails: AtomicBool::new(false),
        }
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn respond_with_status(&self, status: u16) {
        self.webhook_status.store(status, Ordering::SeqCst);
    }

    pub fn delay_webhooks(&self, delay: Duration) {
        *self
            .webhook_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn fail_emails(&self) {
        self.fail_emails.store(true, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<NotificationMessage> {
        self.recorded().notifications.clone()
    }

    pub fn emails(&self) -> Vec<EmailMessage> {
        self.recorded().emails.clone()
    }

    pub fn webhooks(&self) -> Vec<WebhookRequest> {
        self.recorded().webhooks.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn notify(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        self.recorded().notifications.push(message.clone());
        Ok(())
    }

    async fn send_email(&self, message: &EmailMessage) -> Result<(), TransportError> {
        if self.fail_emails.load(Ordering::SeqCst) {
            return Err(TransportError::Other("SMTP relay refused the message".into()));
        }
        self.recorded().emails.push(message.clone());
        Ok(())
    }

    async fn call_webhook(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        let delay = *self
            .webhook_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.recorded().webhooks.push(request.clone());
        Ok(self.webhook_status.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A small seeded workflow shared by tests.
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures {
    use chrono::Duration;

    use super::*;

    /// `Open -> In Progress -> {Resolved, Closed}`.
    #[derive(Debug, Clone)]
    pub struct BasicFlow {
        pub workflow: Workflow,
        pub open: WorkflowState,
        pub in_progress: WorkflowState,
        pub resolved: WorkflowState,
        pub closed: WorkflowState,
        pub start: Transition,
        pub resolve: Transition,
        pub close: Transition,
    }

    pub fn basic_workflow(store: &MemoryStore) -> BasicFlow {
        let workflow = store.add_workflow(&CreateWorkflow {
            name: "Incident".to_string(),
            code: "incident-default".to_string(),
            record_type: "incident".to_string(),
            required_fields: None,
            is_default: Some(true),
        });
        let state = |name: &str, code: &str, state_type: &str, sla_hours| {
            store.add_state(&CreateWorkflowState {
                workflow_id: workflow.id,
                name: name.to_string(),
                code: code.to_string(),
                state_type: state_type.to_string(),
                sla_hours,
                viewable_role_ids: Vec::new(),
            })
        };
        let open = state("Open", "open", "initial", Some(24));
        let in_progress = state("In Progress", "in_progress", "normal", Some(8));
        let resolved = state("Resolved", "resolved", "terminal", None);
        let closed = state("Closed", "closed", "terminal", None);

        let edge = |name: &str, from: &WorkflowState, to: &WorkflowState| {
            store.add_transition(&CreateTransition {
                workflow_id: workflow.id,
                name: name.to_string(),
                from_state_id: from.id,
                to_state_id: to.id,
                ..Default::default()
            })
        };
        let start = edge("Start work", &open, &in_progress);
        let resolve = edge("Resolve", &in_progress, &resolved);
        let close = edge("Close", &in_progress, &closed);

        BasicFlow {
            workflow,
            open,
            in_progress,
            resolved,
            closed,
            start,
            resolve,
            close,
        }
    }

    /// An incident sitting in `Open` with a deadline 24 hours out.
    pub async fn open_incident(store: &MemoryStore, flow: &BasicFlow) -> StoreResult<Incident> {
        store
            .create_incident(&CreateIncident {
                title: "Mail server unreachable".to_string(),
                description: "Users cannot send mail".to_string(),
                workflow_id: flow.workflow.id,
                current_state_id: flow.open.id,
                priority: 3,
                severity: 3,
                classification_id: None,
                location_id: None,
                department_id: None,
                assignee_id: None,
                reporter_id: None,
                custom_fields: serde_json::json!({}),
                sla_deadline: Some(Utc::now() + Duration::hours(24)),
            })
            .await
    }
}
