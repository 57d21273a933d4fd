//! Revision (audit trail) vocabulary for incidents.
//!
//! Revisions are append-only and numbered per incident. This module holds
//! the action type names and the structured field-change payload.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Action type constants
// ---------------------------------------------------------------------------

/// Known action types for revision entries.
pub mod action_types {
    pub const CREATED: &str = "created";
    pub const FIELD_CHANGED: &str = "field_changed";
    pub const STATUS_CHANGED: &str = "status_changed";
    pub const COMMENT_ADDED: &str = "comment_added";
    pub const COMMENT_EDITED: &str = "comment_edited";
    pub const COMMENT_DELETED: &str = "comment_deleted";
    pub const ATTACHMENT_ADDED: &str = "attachment_added";
    pub const ATTACHMENT_DELETED: &str = "attachment_deleted";
    pub const ASSIGNED: &str = "assigned";
    pub const CONVERTED: &str = "converted";

    /// Every valid action type.
    pub const ALL: &[&str] = &[
        CREATED,
        FIELD_CHANGED,
        STATUS_CHANGED,
        COMMENT_ADDED,
        COMMENT_EDITED,
        COMMENT_DELETED,
        ATTACHMENT_ADDED,
        ATTACHMENT_DELETED,
        ASSIGNED,
        CONVERTED,
    ];
}

/// Validate that an action type is one of [`action_types::ALL`].
pub fn validate_action_type(action_type: &str) -> Result<(), String> {
    if action_types::ALL.contains(&action_type) {
        Ok(())
    } else {
        Err(format!(
            "Invalid revision action type '{action_type}'. Must be one of: {}",
            action_types::ALL.join(", ")
        ))
    }
}

// ---------------------------------------------------------------------------
// Field changes
// ---------------------------------------------------------------------------

/// One changed field inside a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub label: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

impl FieldChange {
    /// Build a change with the field's display label.
    pub fn new(
        field: &str,
        old_value: impl Into<serde_json::Value>,
        new_value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.to_string(),
            label: field_label(field),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    /// Build a change only when the values differ.
    pub fn if_changed<T>(field: &str, old_value: T, new_value: T) -> Option<Self>
    where
        T: PartialEq + Into<serde_json::Value>,
    {
        (old_value != new_value).then(|| Self::new(field, old_value, new_value))
    }
}

/// Human label for an incident column.
pub fn field_label(field: &str) -> String {
    match field {
        "current_state_id" => "Status".to_string(),
        "assignee_id" => "Assignee".to_string(),
        "department_id" => "Department".to_string(),
        "sla_deadline" => "SLA deadline".to_string(),
        "sla_breached" => "SLA breached".to_string(),
        other => {
            let trimmed = other.strip_suffix("_id").unwrap_or(other);
            let mut label = trimmed.replace('_', " ");
            if let Some(first) = label.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            label
        }
    }
}

/// Description for a status-change revision.
pub fn describe_status_change(old_state: &str, new_state: &str) -> String {
    format!("Status changed from {old_state} to {new_state}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn all_action_types_validate() {
        for t in action_types::ALL {
            assert!(validate_action_type(t).is_ok());
        }
        assert!(validate_action_type("deleted").is_err());
    }

    #[test]
    fn labels_are_humanised() {
        assert_eq!(field_label("current_state_id"), "Status");
        assert_eq!(field_label("priority"), "Priority");
        assert_eq!(field_label("classification_id"), "Classification");
        assert_eq!(field_label("custom_fields"), "Custom fields");
    }

    #[test]
    fn if_changed_skips_equal_values() {
        assert!(FieldChange::if_changed("priority", 3, 3).is_none());
        let change = FieldChange::if_changed("priority", 3, 1).unwrap();
        assert_eq!(change.old_value, json!(3));
        assert_eq!(change.new_value, json!(1));
        assert_eq!(change.label, "Priority");
    }

    #[test]
    fn status_description_names_both_states() {
        assert_eq!(
            describe_status_change("Open", "In Progress"),
            "Status changed from Open to In Progress"
        );
    }

    #[test]
    fn field_change_serializes_structurally() {
        let change = FieldChange::new("assignee_id", json!(null), json!(8));
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["field"], "assignee_id");
        assert_eq!(value["label"], "Assignee");
        assert!(value["old_value"].is_null());
        assert_eq!(value["new_value"], 8);
    }
}
