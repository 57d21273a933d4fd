//! Workflow definition models: workflows, states, transitions and their
//! requirement and action rows.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use triage_core::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A row from the `workflows` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Workflow {
    pub id: DbId,
    pub name: String,
    pub code: String,
    pub record_type: String,
    pub required_fields: serde_json::Value,
    pub is_active: bool,
    pub is_default: bool,
    pub version: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

/// DTO for creating a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflow {
    pub name: String,
    pub code: String,
    pub record_type: String,
    pub required_fields: Option<serde_json::Value>,
    pub is_default: Option<bool>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A row from the `workflow_states` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkflowState {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub code: String,
    pub state_type: String,
    pub sla_hours: Option<i32>,
    pub viewable_role_ids: Vec<DbId>,
    pub created_at: Timestamp,
}

/// DTO for creating a state.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowState {
    pub workflow_id: DbId,
    pub name: String,
    pub code: String,
    pub state_type: String,
    pub sla_hours: Option<i32>,
    #[serde(default)]
    pub viewable_role_ids: Vec<DbId>,
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A row from the `workflow_transitions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transition {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub from_state_id: DbId,
    pub to_state_id: DbId,
    pub is_active: bool,
    /// Empty means any role may execute the transition.
    pub allowed_role_ids: Vec<DbId>,
    pub assign_user_id: Option<DbId>,
    pub assignment_role_id: Option<DbId>,
    pub manual_select_user: bool,
    pub auto_match_user: bool,
    pub assign_department_id: Option<DbId>,
    pub auto_detect_department: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a transition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTransition {
    pub workflow_id: DbId,
    pub name: String,
    pub from_state_id: DbId,
    pub to_state_id: DbId,
    #[serde(default)]
    pub allowed_role_ids: Vec<DbId>,
    pub assign_user_id: Option<DbId>,
    pub assignment_role_id: Option<DbId>,
    #[serde(default)]
    pub manual_select_user: bool,
    #[serde(default)]
    pub auto_match_user: bool,
    pub assign_department_id: Option<DbId>,
    #[serde(default)]
    pub auto_detect_department: bool,
}

/// A row from the `transition_requirements` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransitionRequirement {
    pub id: DbId,
    pub transition_id: DbId,
    pub requirement_type: String,
    pub is_mandatory: bool,
    pub error_message: Option<String>,
    pub sort_order: i32,
}

/// DTO for attaching a requirement to a transition.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransitionRequirement {
    pub transition_id: DbId,
    pub requirement_type: String,
    pub is_mandatory: bool,
    pub error_message: Option<String>,
    pub sort_order: Option<i32>,
}

/// A row from the `transition_actions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TransitionAction {
    pub id: DbId,
    pub transition_id: DbId,
    pub name: String,
    pub action_type: String,
    /// Type-specific payload, decoded at dispatch time.
    pub config: serde_json::Value,
    pub execution_order: i32,
    pub is_async: bool,
    pub is_active: bool,
}

/// DTO for attaching an action to a transition.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransitionAction {
    pub transition_id: DbId,
    pub name: Option<String>,
    pub action_type: String,
    pub config: serde_json::Value,
    pub execution_order: Option<i32>,
    pub is_async: Option<bool>,
}

/// A transition with its requirements and actions, both in declaration
/// order (`sort_order`/`execution_order`, then id).
#[derive(Debug, Clone, Serialize)]
pub struct TransitionWithRelations {
    pub transition: Transition,
    pub requirements: Vec<TransitionRequirement>,
    pub actions: Vec<TransitionAction>,
}
