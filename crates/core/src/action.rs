//! Transition action types and their typed configuration payloads.
//!
//! Actions are stored as a type tag plus an opaque JSON payload. The payload
//! is decoded into [`ActionConfig`] at dispatch time, so a malformed row
//! fails only the action it belongs to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::incident::validate_level;
use crate::types::DbId;

/// Upper bound on webhook retries a single action may request.
pub const MAX_WEBHOOK_RETRIES: u8 = 3;

/// HTTP methods a webhook action may use.
pub const WEBHOOK_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// Side effect kinds attachable to a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Notification,
    Email,
    Webhook,
    FieldUpdate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::FieldUpdate => "field_update",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "notification" => Ok(Self::Notification),
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            "field_update" => Ok(Self::FieldUpdate),
            _ => Err(CoreError::Validation(format!(
                "Invalid action_type: '{s}'. Must be one of: notification, email, webhook, field_update"
            ))),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Per-type configuration
// ---------------------------------------------------------------------------

/// In-app notification to resolved recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

/// Plain-text email to resolved addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Outbound HTTP call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON body template; string leaves are placeholder-substituted.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub retries: u8,
}

impl WebhookConfig {
    /// Upper-cased method, defaulting to `POST`.
    pub fn method(&self) -> String {
        self.method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| "POST".to_string())
    }

    fn validate(&self) -> Result<(), CoreError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(CoreError::Validation(format!(
                "Webhook url must be http(s): '{}'",
                self.url
            )));
        }
        let method = self.method();
        if !WEBHOOK_METHODS.contains(&method.as_str()) {
            return Err(CoreError::Validation(format!(
                "Unsupported webhook method '{method}'"
            )));
        }
        if self.retries > MAX_WEBHOOK_RETRIES {
            return Err(CoreError::Validation(format!(
                "Webhook retries must be at most {MAX_WEBHOOK_RETRIES}"
            )));
        }
        Ok(())
    }
}

/// Direct write of one incident field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdateConfig {
    pub field: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl FieldUpdateConfig {
    /// Convert into a typed update, rejecting unsupported fields.
    pub fn to_update(&self) -> Result<FieldUpdate, CoreError> {
        match self.field.as_str() {
            "priority" => {
                let v = level_value(&self.field, &self.value)?;
                Ok(FieldUpdate::Priority(v))
            }
            "severity" => {
                let v = level_value(&self.field, &self.value)?;
                Ok(FieldUpdate::Severity(v))
            }
            "assignee_id" => Ok(FieldUpdate::AssigneeId(optional_id(&self.field, &self.value)?)),
            "department_id" => Ok(FieldUpdate::DepartmentId(optional_id(
                &self.field,
                &self.value,
            )?)),
            other => Err(CoreError::Validation(format!(
                "Unsupported field_update field '{other}'. Must be one of: priority, severity, assignee_id, department_id"
            ))),
        }
    }
}

/// A single typed field write applied by a `field_update` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    Priority(i16),
    Severity(i16),
    AssigneeId(Option<DbId>),
    DepartmentId(Option<DbId>),
}

impl FieldUpdate {
    /// Column name the update targets.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Priority(_) => "priority",
            Self::Severity(_) => "severity",
            Self::AssigneeId(_) => "assignee_id",
            Self::DepartmentId(_) => "department_id",
        }
    }

    /// The new value as JSON, for revision payloads.
    pub fn value_json(&self) -> serde_json::Value {
        match self {
            Self::Priority(v) | Self::Severity(v) => serde_json::json!(v),
            Self::AssigneeId(v) | Self::DepartmentId(v) => serde_json::json!(v),
        }
    }
}

fn as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn level_value(field: &str, value: &serde_json::Value) -> Result<i16, CoreError> {
    let raw = as_i64(value)
        .ok_or_else(|| CoreError::Validation(format!("{field} must be an integer")))?;
    let level = i16::try_from(raw)
        .map_err(|_| CoreError::Validation(format!("{field} is out of range")))?;
    validate_level(field, level)?;
    Ok(level)
}

fn optional_id(field: &str, value: &serde_json::Value) -> Result<Option<DbId>, CoreError> {
    if value.is_null() {
        return Ok(None);
    }
    match as_i64(value) {
        Some(id) if id > 0 => Ok(Some(id)),
        _ => Err(CoreError::Validation(format!(
            "{field} must be a positive id or null"
        ))),
    }
}

// ---------------------------------------------------------------------------
// ActionConfig
// ---------------------------------------------------------------------------

/// Decoded action payload, selected by the action's type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionConfig {
    Notification(NotificationConfig),
    Email(EmailConfig),
    Webhook(WebhookConfig),
    FieldUpdate(FieldUpdateConfig),
}

impl ActionConfig {
    /// Decode a stored `(action_type, config)` pair.
    pub fn decode(action_type: &str, config: &serde_json::Value) -> Result<Self, CoreError> {
        let kind = ActionType::from_str(action_type)?;
        let invalid = |e: serde_json::Error| {
            CoreError::Validation(format!("Invalid {kind} action config: {e}"))
        };
        let decoded = match kind {
            ActionType::Notification => {
                Self::Notification(serde_json::from_value(config.clone()).map_err(invalid)?)
            }
            ActionType::Email => Self::Email(serde_json::from_value(config.clone()).map_err(invalid)?),
            ActionType::Webhook => {
                let webhook: WebhookConfig =
                    serde_json::from_value(config.clone()).map_err(invalid)?;
                webhook.validate()?;
                Self::Webhook(webhook)
            }
            ActionType::FieldUpdate => {
                let update: FieldUpdateConfig =
                    serde_json::from_value(config.clone()).map_err(invalid)?;
                update.to_update()?;
                Self::FieldUpdate(update)
            }
        };
        Ok(decoded)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Notification(_) => ActionType::Notification,
            Self::Email(_) => ActionType::Email,
            Self::Webhook(_) => ActionType::Webhook,
            Self::FieldUpdate(_) => ActionType::FieldUpdate,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_notification_with_defaults() {
        let cfg = ActionConfig::decode("notification", &json!({"recipients": ["assignee"]})).unwrap();
        assert_matches!(cfg, ActionConfig::Notification(n) if n.recipients == vec!["assignee"] && n.title.is_empty());
    }

    #[test]
    fn decodes_webhook_and_defaults_method_to_post() {
        let cfg = ActionConfig::decode(
            "webhook",
            &json!({"url": "https://hooks.example.com/x", "headers": {"X-Token": "abc"}}),
        )
        .unwrap();
        let ActionConfig::Webhook(w) = cfg else {
            panic!("expected webhook");
        };
        assert_eq!(w.method(), "POST");
        assert_eq!(w.headers.get("X-Token").map(String::as_str), Some("abc"));
        assert_eq!(w.retries, 0);
    }

    #[test]
    fn webhook_method_is_normalised() {
        let w = WebhookConfig {
            url: "http://x".into(),
            method: Some(" put ".into()),
            headers: BTreeMap::new(),
            body: None,
            retries: 0,
        };
        assert_eq!(w.method(), "PUT");
    }

    #[test]
    fn webhook_rejects_non_http_url_and_excess_retries() {
        assert!(ActionConfig::decode("webhook", &json!({"url": "ftp://x"})).is_err());
        assert!(ActionConfig::decode("webhook", &json!({"url": "https://x", "retries": 9})).is_err());
        assert!(ActionConfig::decode("webhook", &json!({"url": "https://x", "method": "TRACE"})).is_err());
    }

    #[test]
    fn missing_webhook_url_is_invalid() {
        assert_matches!(
            ActionConfig::decode("webhook", &json!({})),
            Err(CoreError::Validation(m)) if m.contains("webhook")
        );
    }

    #[test]
    fn unknown_action_type_is_invalid() {
        assert!(ActionConfig::decode("sms", &json!({})).is_err());
    }

    #[test]
    fn field_update_supports_typed_fields() {
        let p = FieldUpdateConfig {
            field: "priority".into(),
            value: json!(1),
        };
        assert_eq!(p.to_update().unwrap(), FieldUpdate::Priority(1));

        let s = FieldUpdateConfig {
            field: "severity".into(),
            value: json!("5"),
        };
        assert_eq!(s.to_update().unwrap(), FieldUpdate::Severity(5));

        let a = FieldUpdateConfig {
            field: "assignee_id".into(),
            value: json!(null),
        };
        assert_eq!(a.to_update().unwrap(), FieldUpdate::AssigneeId(None));

        let d = FieldUpdateConfig {
            field: "department_id".into(),
            value: json!(42),
        };
        assert_eq!(d.to_update().unwrap(), FieldUpdate::DepartmentId(Some(42)));
    }

    #[test]
    fn field_update_rejects_unsupported_field_and_bad_values() {
        let title = FieldUpdateConfig {
            field: "title".into(),
            value: json!("x"),
        };
        assert_matches!(title.to_update(), Err(CoreError::Validation(m)) if m.contains("Unsupported"));

        let too_high = FieldUpdateConfig {
            field: "priority".into(),
            value: json!(9),
        };
        assert!(too_high.to_update().is_err());

        let negative_id = FieldUpdateConfig {
            field: "assignee_id".into(),
            value: json!(-3),
        };
        assert!(negative_id.to_update().is_err());
    }

    #[test]
    fn field_update_value_json_matches_variant() {
        assert_eq!(FieldUpdate::Priority(2).value_json(), json!(2));
        assert_eq!(FieldUpdate::AssigneeId(None).value_json(), json!(null));
        assert_eq!(FieldUpdate::DepartmentId(Some(4)).field(), "department_id");
    }
}
