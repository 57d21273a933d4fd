//! Incident creation and edits outside of transitions.
//!
//! Every successful mutation appends a revision. Revision failures are
//! logged and do not undo the mutation.

use std::sync::Arc;

use chrono::Utc;
use triage_core::error::CoreError;
use triage_core::incident::{validate_level, validate_title, DEFAULT_LEVEL};
use triage_core::revision::FieldChange;
use triage_core::sla::compute_deadline;
use triage_core::types::DbId;
use triage_core::workflow::RecordType;
use triage_db::models::history::{
    Attachment, Comment, CreateAttachment, CreateComment, TransitionHistory,
};
use triage_db::models::incident::{CreateIncident, Incident, IncidentPatch};
use triage_db::models::revision::Revision;
use triage_db::models::workflow::Workflow;

use crate::error::WorkflowResult;
use crate::revision::RevisionWriter;
use crate::store::{Collaborators, IncidentStore, WorkflowStore};

/// Input for [`IncidentService::create`].
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub title: String,
    pub description: String,
    pub record_type: RecordType,
    /// Explicit workflow; the record type's default when `None`.
    pub workflow_id: Option<DbId>,
    pub priority: Option<i16>,
    pub severity: Option<i16>,
    pub classification_id: Option<DbId>,
    pub location_id: Option<DbId>,
    pub department_id: Option<DbId>,
    pub assignee_id: Option<DbId>,
    pub reporter_id: Option<DbId>,
    pub custom_fields: Option<serde_json::Value>,
}

impl NewIncident {
    pub fn new(title: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            record_type,
            workflow_id: None,
            priority: None,
            severity: None,
            classification_id: None,
            location_id: None,
            department_id: None,
            assignee_id: None,
            reporter_id: None,
            custom_fields: None,
        }
    }
}

#[derive(Clone)]
pub struct IncidentService {
    workflows: Arc<dyn WorkflowStore>,
    incidents: Arc<dyn IncidentStore>,
    revisions: RevisionWriter,
}

impl IncidentService {
    pub fn new(collaborators: &Collaborators) -> Self {
        Self {
            workflows: Arc::clone(&collaborators.workflows),
            incidents: Arc::clone(&collaborators.incidents),
            revisions: RevisionWriter::new(Arc::clone(&collaborators.revisions)),
        }
    }

    /// Create an incident in its workflow's initial state.
    pub async fn create(&self, input: NewIncident, actor_id: DbId) -> WorkflowResult<Incident> {
        validate_title(&input.title)?;
        let priority = input.priority.unwrap_or(DEFAULT_LEVEL);
        let severity = input.severity.unwrap_or(DEFAULT_LEVEL);
        validate_level("priority", priority)?;
        validate_level("severity", severity)?;

        let workflow = self.resolve_workflow(input.workflow_id, input.record_type).await?;
        let initial = self
            .workflows
            .initial_state(workflow.id)
            .await?
            .ok_or_else(|| {
                CoreError::Validation(format!("Workflow '{}' has no initial state", workflow.code))
            })?;

        let incident = self
            .incidents
            .create_incident(&CreateIncident {
                title: input.title.trim().to_string(),
                description: input.description,
                workflow_id: workflow.id,
                current_state_id: initial.id,
                priority,
                severity,
                classification_id: input.classification_id,
                location_id: input.location_id,
                department_id: input.department_id,
                assignee_id: input.assignee_id,
                reporter_id: input.reporter_id,
                custom_fields: input
                    .custom_fields
                    .unwrap_or_else(|| serde_json::json!({})),
                sla_deadline: compute_deadline(Utc::now(), initial.sla_hours),
            })
            .await?;

        if let Err(e) = self.revisions.record_created(&incident, actor_id).await {
            tracing::warn!(incident_id = incident.id, error = %e, "Failed to record creation revision");
        }

        tracing::info!(
            incident_id = incident.id,
            incident_number = %incident.incident_number,
            workflow_id = workflow.id,
            "Incident created"
        );
        Ok(incident)
    }

    /// Apply the fields of `patch` that differ from the stored incident.
    ///
    /// A patch that changes nothing writes nothing and returns the incident
    /// as stored.
    pub async fn update_fields(
        &self,
        incident_id: DbId,
        patch: IncidentPatch,
        actor_id: DbId,
    ) -> WorkflowResult<Incident> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(priority) = patch.priority {
            validate_level("priority", priority)?;
        }
        if let Some(severity) = patch.severity {
            validate_level("severity", severity)?;
        }

        let current = self.load(incident_id).await?;
        let mut changes = Vec::new();
        let effective = IncidentPatch {
            title: diff(
                "title",
                &current.title,
                patch.title.map(|t| t.trim().to_string()),
                &mut changes,
            ),
            description: diff("description", &current.description, patch.description, &mut changes),
            priority: diff("priority", &current.priority, patch.priority, &mut changes),
            severity: diff("severity", &current.severity, patch.severity, &mut changes),
            classification_id: diff_id(
                "classification_id",
                current.classification_id,
                patch.classification_id,
                &mut changes,
            ),
            location_id: diff_id("location_id", current.location_id, patch.location_id, &mut changes),
            department_id: diff_id(
                "department_id",
                current.department_id,
                patch.department_id,
                &mut changes,
            ),
            assignee_id: diff_id("assignee_id", current.assignee_id, patch.assignee_id, &mut changes),
            custom_fields: diff(
                "custom_fields",
                &current.custom_fields,
                patch.custom_fields,
                &mut changes,
            ),
        };

        if effective.is_empty() {
            return Ok(current);
        }

        let updated = self
            .incidents
            .update_fields(incident_id, &effective)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "incident",
                id: incident_id,
            })?;

        if let Err(e) = self
            .revisions
            .record_field_changes(incident_id, &changes, Some(actor_id))
            .await
        {
            tracing::warn!(incident_id, error = %e, "Failed to record field-change revision");
        }
        Ok(updated)
    }

    /// Add a comment outside of a transition.
    pub async fn add_comment(
        &self,
        incident_id: DbId,
        body: &str,
        is_internal: bool,
        actor_id: DbId,
    ) -> WorkflowResult<Comment> {
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::Validation("Comment must not be empty".to_string()).into());
        }
        self.load(incident_id).await?;

        let comment = self
            .incidents
            .create_comment(&CreateComment {
                incident_id,
                author_id: actor_id,
                body: body.to_string(),
                is_internal,
                transition_history_id: None,
            })
            .await?;

        if let Err(e) = self
            .revisions
            .record_comment_added(incident_id, comment.id, actor_id)
            .await
        {
            tracing::warn!(incident_id, error = %e, "Failed to record comment revision");
        }
        Ok(comment)
    }

    /// Replace a comment's body. An unchanged body writes nothing.
    pub async fn edit_comment(
        &self,
        comment_id: DbId,
        body: &str,
        actor_id: DbId,
    ) -> WorkflowResult<Comment> {
        let body = body.trim();
        if body.is_empty() {
            return Err(CoreError::Validation("Comment must not be empty".to_string()).into());
        }
        let current = self
            .incidents
            .find_comment(comment_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "comment",
                id: comment_id,
            })?;
        if current.body == body {
            return Ok(current);
        }

        let updated = self
            .incidents
            .update_comment(comment_id, body)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "comment",
                id: comment_id,
            })?;

        if let Err(e) = self
            .revisions
            .record_comment_edited(updated.incident_id, comment_id, &current.body, body, actor_id)
            .await
        {
            tracing::warn!(incident_id = updated.incident_id, error = %e, "Failed to record comment revision");
        }
        Ok(updated)
    }

    pub async fn delete_comment(&self, comment_id: DbId, actor_id: DbId) -> WorkflowResult<Comment> {
        let deleted = self
            .incidents
            .delete_comment(comment_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "comment",
                id: comment_id,
            })?;

        if let Err(e) = self
            .revisions
            .record_comment_deleted(deleted.incident_id, comment_id, actor_id)
            .await
        {
            tracing::warn!(incident_id = deleted.incident_id, error = %e, "Failed to record comment revision");
        }
        Ok(deleted)
    }

    /// Register an uploaded file against an incident.
    pub async fn add_attachment(
        &self,
        incident_id: DbId,
        file_name: &str,
        storage_key: &str,
        actor_id: DbId,
    ) -> WorkflowResult<Attachment> {
        let file_name = file_name.trim();
        if file_name.is_empty() || storage_key.trim().is_empty() {
            return Err(CoreError::Validation(
                "Attachment file name and storage key are required".to_string(),
            )
            .into());
        }
        self.load(incident_id).await?;

        let attachment = self
            .incidents
            .create_attachment(&CreateAttachment {
                incident_id,
                file_name: file_name.to_string(),
                storage_key: storage_key.to_string(),
            })
            .await?;

        if let Err(e) = self
            .revisions
            .record_attachment_added(incident_id, &attachment.file_name, actor_id)
            .await
        {
            tracing::warn!(incident_id, error = %e, "Failed to record attachment revision");
        }
        Ok(attachment)
    }

    pub async fn delete_attachment(
        &self,
        attachment_id: DbId,
        actor_id: DbId,
    ) -> WorkflowResult<Attachment> {
        let deleted = self
            .incidents
            .delete_attachment(attachment_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "attachment",
                id: attachment_id,
            })?;

        if let Err(e) = self
            .revisions
            .record_attachment_deleted(deleted.incident_id, &deleted.file_name, actor_id)
            .await
        {
            tracing::warn!(incident_id = deleted.incident_id, error = %e, "Failed to record attachment revision");
        }
        Ok(deleted)
    }

    /// Link an incident to the request record it was converted into.
    ///
    /// An incident converts at most once and never into itself.
    pub async fn convert_to_request(
        &self,
        incident_id: DbId,
        request_id: DbId,
        actor_id: DbId,
    ) -> WorkflowResult<Incident> {
        if incident_id == request_id {
            return Err(CoreError::Validation("An incident cannot convert into itself".to_string()).into());
        }
        let incident = self.load(incident_id).await?;
        if let Some(existing) = incident.converted_request_id {
            return Err(CoreError::Validation(format!(
                "Incident {} was already converted to request #{existing}",
                incident.incident_number
            ))
            .into());
        }
        self.load(request_id).await?;

        let converted = self
            .incidents
            .mark_converted(incident_id, request_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "incident",
                id: incident_id,
            })?;

        if let Err(e) = self
            .revisions
            .record_converted(incident_id, request_id, actor_id)
            .await
        {
            tracing::warn!(incident_id, error = %e, "Failed to record conversion revision");
        }
        Ok(converted)
    }

    pub async fn revisions(&self, incident_id: DbId) -> WorkflowResult<Vec<Revision>> {
        self.revisions.history(incident_id).await
    }

    pub async fn transition_history(
        &self,
        incident_id: DbId,
    ) -> WorkflowResult<Vec<TransitionHistory>> {
        Ok(self.incidents.list_history(incident_id).await?)
    }

    async fn load(&self, incident_id: DbId) -> WorkflowResult<Incident> {
        Ok(self
            .incidents
            .find_incident(incident_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "incident",
                id: incident_id,
            })?)
    }

    async fn resolve_workflow(
        &self,
        workflow_id: Option<DbId>,
        record_type: RecordType,
    ) -> WorkflowResult<Workflow> {
        let Some(id) = workflow_id else {
            return Ok(self
                .workflows
                .find_default_workflow(record_type.as_str())
                .await?
                .ok_or_else(|| {
                    CoreError::Validation(format!(
                        "No default workflow is configured for {record_type} records"
                    ))
                })?);
        };

        let workflow = self
            .workflows
            .find_workflow(id)
            .await?
            .ok_or(CoreError::NotFound { entity: "workflow", id })?;
        if !workflow.is_active {
            return Err(CoreError::Validation(format!("Workflow '{}' is inactive", workflow.code)).into());
        }
        if workflow.record_type != record_type.as_str() {
            return Err(CoreError::Validation(format!(
                "Workflow '{}' governs {} records, not {record_type}",
                workflow.code, workflow.record_type
            ))
            .into());
        }
        Ok(workflow)
    }
}

/// The proposed value when it differs from the current one, noting the change.
fn diff<T>(field: &str, current: &T, proposed: Option<T>, changes: &mut Vec<FieldChange>) -> Option<T>
where
    T: PartialEq + Clone + Into<serde_json::Value>,
{
    let proposed = proposed.filter(|p| p != current)?;
    changes.push(FieldChange::new(field, current.clone(), proposed.clone()));
    Some(proposed)
}

fn diff_id(
    field: &str,
    current: Option<DbId>,
    proposed: Option<DbId>,
    changes: &mut Vec<FieldChange>,
) -> Option<DbId> {
    let proposed = proposed.filter(|p| current != Some(*p))?;
    changes.push(FieldChange::new(field, current, proposed));
    Some(proposed)
}
