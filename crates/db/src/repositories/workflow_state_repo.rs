//! Repository for the `workflow_states` table.

use sqlx::PgPool;
use triage_core::types::DbId;

use crate::models::workflow::{CreateWorkflowState, WorkflowState};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str =
    "id, workflow_id, name, code, state_type, sla_hours, viewable_role_ids, created_at";

/// Provides lookup operations for workflow states.
pub struct WorkflowStateRepo;

impl WorkflowStateRepo {
    /// Insert a new state, returning the created row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateWorkflowState,
    ) -> Result<WorkflowState, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_states (workflow_id, name, code, state_type, sla_hours, viewable_role_ids)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkflowState>(&query)
            .bind(input.workflow_id)
            .bind(&input.name)
            .bind(&input.code)
            .bind(&input.state_type)
            .bind(input.sla_hours)
            .bind(&input.viewable_role_ids)
            .fetch_one(pool)
            .await
    }

    /// Find a state by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WorkflowState>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflow_states WHERE id = $1");
        sqlx::query_as::<_, WorkflowState>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The workflow's initial state (lowest id if misconfigured with several).
    pub async fn find_initial(
        pool: &PgPool,
        workflow_id: DbId,
    ) -> Result<Option<WorkflowState>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_states
             WHERE workflow_id = $1 AND state_type = 'initial'
             ORDER BY id LIMIT 1"
        );
        sqlx::query_as::<_, WorkflowState>(&query)
            .bind(workflow_id)
            .fetch_optional(pool)
            .await
    }

    /// List all states of a workflow.
    pub async fn list_for_workflow(
        pool: &PgPool,
        workflow_id: DbId,
    ) -> Result<Vec<WorkflowState>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM workflow_states WHERE workflow_id = $1 ORDER BY id");
        sqlx::query_as::<_, WorkflowState>(&query)
            .bind(workflow_id)
            .fetch_all(pool)
            .await
    }
}
