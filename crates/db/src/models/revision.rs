//! Incident revision model. Revisions have no `updated_at` (immutable).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use triage_core::revision::FieldChange;
use triage_core::types::{DbId, Timestamp};

/// A row from the `incident_revisions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Revision {
    pub id: DbId,
    pub incident_id: DbId,
    pub revision_number: i32,
    pub action_type: String,
    pub description: String,
    /// Serialized `Vec<FieldChange>`.
    pub changes: serde_json::Value,
    pub performed_by: Option<DbId>,
    pub created_at: Timestamp,
}

impl Revision {
    /// Decode the structured change list.
    pub fn field_changes(&self) -> Result<Vec<FieldChange>, serde_json::Error> {
        serde_json::from_value(self.changes.clone())
    }
}

/// DTO for appending a revision. The number is allocated on insert.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRevision {
    pub incident_id: DbId,
    pub action_type: String,
    pub description: String,
    pub changes: serde_json::Value,
    pub performed_by: Option<DbId>,
}
