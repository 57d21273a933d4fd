//! Revision log writer.
//!
//! Every mutation of an incident appends one immutable, numbered revision.
//! Number allocation is delegated to the [`RevisionStore`], which must
//! serialize concurrent appends for the same incident.

use std::sync::Arc;

use triage_core::error::CoreError;
use triage_core::revision::{action_types, describe_status_change, validate_action_type, FieldChange};
use triage_core::types::DbId;
use triage_db::models::incident::Incident;
use triage_db::models::revision::{CreateRevision, Revision};
use triage_db::models::workflow::WorkflowState;

use crate::error::WorkflowResult;
use crate::store::RevisionStore;

#[derive(Clone)]
pub struct RevisionWriter {
    store: Arc<dyn RevisionStore>,
}

impl RevisionWriter {
    pub fn new(store: Arc<dyn RevisionStore>) -> Self {
        Self { store }
    }

    /// Append a revision.
    pub async fn record(
        &self,
        incident_id: DbId,
        action_type: &str,
        description: impl Into<String>,
        changes: &[FieldChange],
        performed_by: Option<DbId>,
    ) -> WorkflowResult<Revision> {
        validate_action_type(action_type).map_err(CoreError::Validation)?;
        let changes = serde_json::to_value(changes)
            .map_err(|e| CoreError::Internal(format!("Failed to encode field changes: {e}")))?;

        let revision = self
            .store
            .append_revision(&CreateRevision {
                incident_id,
                action_type: action_type.to_string(),
                description: description.into(),
                changes,
                performed_by,
            })
            .await?;

        tracing::debug!(
            incident_id,
            revision_number = revision.revision_number,
            action_type,
            "Revision recorded"
        );
        Ok(revision)
    }

    pub async fn history(&self, incident_id: DbId) -> WorkflowResult<Vec<Revision>> {
        Ok(self.store.list_revisions(incident_id).await?)
    }

    // -- typed helpers ------------------------------------------------------

    pub async fn record_created(
        &self,
        incident: &Incident,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        self.record(
            incident.id,
            action_types::CREATED,
            format!("Incident {} created", incident.incident_number),
            &[],
            Some(performed_by),
        )
        .await
    }

    pub async fn record_status_change(
        &self,
        incident_id: DbId,
        from: &WorkflowState,
        to: &WorkflowState,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        let change = FieldChange::new("current_state_id", from.name.as_str(), to.name.as_str());
        self.record(
            incident_id,
            action_types::STATUS_CHANGED,
            describe_status_change(&from.name, &to.name),
            &[change],
            Some(performed_by),
        )
        .await
    }

    /// Record a set of field edits. A change touching only the assignee is
    /// recorded as an assignment. Returns `None` for an empty set.
    pub async fn record_field_changes(
        &self,
        incident_id: DbId,
        changes: &[FieldChange],
        performed_by: Option<DbId>,
    ) -> WorkflowResult<Option<Revision>> {
        if changes.is_empty() {
            return Ok(None);
        }
        let only_assignee = changes.iter().all(|c| c.field == "assignee_id");
        let (action_type, description) = if only_assignee {
            (action_types::ASSIGNED, "Assignee changed".to_string())
        } else {
            let labels: Vec<&str> = changes.iter().map(|c| c.label.as_str()).collect();
            (action_types::FIELD_CHANGED, format!("Updated {}", labels.join(", ")))
        };
        self.record(incident_id, action_type, description, changes, performed_by)
            .await
            .map(Some)
    }

    pub async fn record_comment_added(
        &self,
        incident_id: DbId,
        comment_id: DbId,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        self.record(
            incident_id,
            action_types::COMMENT_ADDED,
            format!("Comment #{comment_id} added"),
            &[],
            Some(performed_by),
        )
        .await
    }

    pub async fn record_comment_edited(
        &self,
        incident_id: DbId,
        comment_id: DbId,
        old_body: &str,
        new_body: &str,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        let change = FieldChange::new("comment", old_body, new_body);
        self.record(
            incident_id,
            action_types::COMMENT_EDITED,
            format!("Comment #{comment_id} edited"),
            &[change],
            Some(performed_by),
        )
        .await
    }

    pub async fn record_comment_deleted(
        &self,
        incident_id: DbId,
        comment_id: DbId,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        self.record(
            incident_id,
            action_types::COMMENT_DELETED,
            format!("Comment #{comment_id} deleted"),
            &[],
            Some(performed_by),
        )
        .await
    }

    pub async fn record_attachment_added(
        &self,
        incident_id: DbId,
        file_name: &str,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        self.record(
            incident_id,
            action_types::ATTACHMENT_ADDED,
            format!("Attachment '{file_name}' added"),
            &[],
            Some(performed_by),
        )
        .await
    }

    pub async fn record_attachment_deleted(
        &self,
        incident_id: DbId,
        file_name: &str,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        self.record(
            incident_id,
            action_types::ATTACHMENT_DELETED,
            format!("Attachment '{file_name}' deleted"),
            &[],
            Some(performed_by),
        )
        .await
    }

    /// Record conversion of the incident into a request record.
    pub async fn record_converted(
        &self,
        incident_id: DbId,
        request_id: DbId,
        performed_by: DbId,
    ) -> WorkflowResult<Revision> {
        let change = FieldChange::new("converted_request_id", serde_json::Value::Null, request_id);
        self.record(
            incident_id,
            action_types::CONVERTED,
            format!("Converted to request #{request_id}"),
            &[change],
            Some(performed_by),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::error::WorkflowError;
    use crate::memory::{fixtures, MemoryStore};

    async fn setup() -> (Arc<MemoryStore>, RevisionWriter, DbId) {
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let incident = fixtures::open_incident(&store, &flow).await.unwrap();
        let writer = RevisionWriter::new(store.clone());
        (store, writer, incident.id)
    }

    #[tokio::test]
    async fn numbers_start_at_one_and_increase() {
        let (_store, writer, id) = setup().await;
        let first = writer.record_comment_added(id, 1, 9).await.unwrap();
        let second = writer.record_comment_deleted(id, 1, 9).await.unwrap();
        assert_eq!(first.revision_number, 1);
        assert_eq!(second.revision_number, 2);
    }

    #[tokio::test]
    async fn concurrent_appends_have_no_gaps_or_duplicates() {
        let (_store, writer, id) = setup().await;
        let tasks: Vec<_> = (0..25)
            .map(|n| {
                let writer = writer.clone();
                tokio::spawn(async move { writer.record_comment_added(id, n, 1).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let numbers: Vec<i32> = writer
            .history(id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.revision_number)
            .collect();
        assert_eq!(numbers, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn assignee_only_changes_are_assignments() {
        let (_store, writer, id) = setup().await;
        let change = FieldChange::new("assignee_id", serde_json::Value::Null, 4);
        let rev = writer
            .record_field_changes(id, &[change], Some(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rev.action_type, action_types::ASSIGNED);
    }

    #[tokio::test]
    async fn mixed_changes_list_their_labels() {
        let (_store, writer, id) = setup().await;
        let changes = [
            FieldChange::new("priority", 3, 1),
            FieldChange::new("assignee_id", serde_json::Value::Null, 4),
        ];
        let rev = writer
            .record_field_changes(id, &changes, Some(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rev.action_type, action_types::FIELD_CHANGED);
        assert_eq!(rev.description, "Updated Priority, Assignee");
        assert_eq!(rev.field_changes().unwrap(), changes.to_vec());
    }

    #[tokio::test]
    async fn empty_change_set_records_nothing() {
        let (_store, writer, id) = setup().await;
        assert!(writer.record_field_changes(id, &[], None).await.unwrap().is_none());
        assert!(writer.history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_action_type_is_rejected() {
        let (_store, writer, id) = setup().await;
        let result = writer.record(id, "renamed", "x", &[], None).await;
        assert_matches!(result, Err(WorkflowError::Core(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn conversion_records_the_back_reference() {
        let (_store, writer, id) = setup().await;
        let rev = writer.record_converted(id, 77, 3).await.unwrap();
        assert_eq!(rev.action_type, action_types::CONVERTED);
        let changes = rev.field_changes().unwrap();
        assert_eq!(changes[0].new_value, serde_json::json!(77));
    }
}
