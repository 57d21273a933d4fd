//! Incident entity model, DTOs and the transition commit payload.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use triage_core::types::{DbId, Timestamp};

use crate::models::history::CreateTransitionHistory;

/// A row from the `incidents` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Incident {
    pub id: DbId,
    pub incident_number: String,
    pub title: String,
    pub description: String,
    pub workflow_id: DbId,
    pub current_state_id: DbId,
    pub priority: i16,
    pub severity: i16,
    pub classification_id: Option<DbId>,
    pub location_id: Option<DbId>,
    pub department_id: Option<DbId>,
    pub assignee_id: Option<DbId>,
    pub reporter_id: Option<DbId>,
    pub custom_fields: serde_json::Value,
    pub sla_deadline: Option<Timestamp>,
    pub sla_breached: bool,
    pub resolved_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub converted_request_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting an incident. Workflow placement and SLA are resolved
/// by the caller before insert.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateIncident {
    pub title: String,
    pub description: String,
    pub workflow_id: DbId,
    pub current_state_id: DbId,
    pub priority: i16,
    pub severity: i16,
    pub classification_id: Option<DbId>,
    pub location_id: Option<DbId>,
    pub department_id: Option<DbId>,
    pub assignee_id: Option<DbId>,
    pub reporter_id: Option<DbId>,
    pub custom_fields: serde_json::Value,
    pub sla_deadline: Option<Timestamp>,
}

/// DTO for editing incident fields. Only non-`None` fields are applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i16>,
    pub severity: Option<i16>,
    pub classification_id: Option<DbId>,
    pub location_id: Option<DbId>,
    pub department_id: Option<DbId>,
    pub assignee_id: Option<DbId>,
    pub custom_fields: Option<serde_json::Value>,
}

impl IncidentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.severity.is_none()
            && self.classification_id.is_none()
            && self.location_id.is_none()
            && self.department_id.is_none()
            && self.assignee_id.is_none()
            && self.custom_fields.is_none()
    }
}

/// Column writes produced by one transition. `None` leaves a column as is.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionUpdate {
    pub to_state_id: DbId,
    pub department_id: Option<DbId>,
    pub assignee_id: Option<DbId>,
    /// Replaces the multi-assignee set when present.
    pub assignee_ids: Option<Vec<DbId>>,
    /// A new deadline also clears the breached flag.
    pub sla_deadline: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub resolved_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Everything committed atomically for one transition: the conditional
/// state update and its history row.
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub incident_id: DbId,
    /// The update only applies while the incident is still in this state.
    pub expected_state_id: DbId,
    pub update: TransitionUpdate,
    pub history: CreateTransitionHistory,
}

/// Aggregate counts logged by the SLA monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct SlaStatistics {
    pub open: i64,
    pub in_progress: i64,
    pub breached: i64,
}
