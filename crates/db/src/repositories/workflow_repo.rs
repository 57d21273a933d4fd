//! Repository for the `workflows` table, including soft delete, restore and
//! duplicate-as-new-version.

use std::collections::HashMap;

use sqlx::PgPool;
use triage_core::types::DbId;

use crate::models::workflow::{CreateWorkflow, Workflow};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, code, record_type, required_fields, is_active, is_default, \
                        version, created_at, updated_at, deleted_at";

/// Provides CRUD and versioning operations for workflows.
pub struct WorkflowRepo;

impl WorkflowRepo {
    /// Insert a new workflow, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateWorkflow) -> Result<Workflow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflows (name, code, record_type, required_fields, is_default)
             VALUES ($1, $2, $3, COALESCE($4, '[]'::jsonb), COALESCE($5, false))
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Workflow>(&query)
            .bind(&input.name)
            .bind(&input.code)
            .bind(&input.record_type)
            .bind(&input.required_fields)
            .bind(input.is_default)
            .fetch_one(pool)
            .await
    }

    /// Find a non-deleted workflow by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Workflow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Workflow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// The active default workflow for a record type, newest version first.
    pub async fn find_default(
        pool: &PgPool,
        record_type: &str,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflows
             WHERE record_type = $1 AND is_default AND is_active AND deleted_at IS NULL
             ORDER BY version DESC, id DESC
             LIMIT 1"
        );
        sqlx::query_as::<_, Workflow>(&query)
            .bind(record_type)
            .fetch_optional(pool)
            .await
    }

    /// List non-deleted workflows ordered by name.
    pub async fn list(pool: &PgPool) -> Result<Vec<Workflow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM workflows WHERE deleted_at IS NULL ORDER BY name, id");
        sqlx::query_as::<_, Workflow>(&query).fetch_all(pool).await
    }

    /// Soft-delete a workflow. Returns `true` if a live row was marked.
    pub async fn soft_delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workflows SET deleted_at = now(), is_active = false, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Restore a soft-deleted workflow. Returns `true` if a row was restored.
    pub async fn restore(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workflows SET deleted_at = NULL, is_active = true, updated_at = now()
             WHERE id = $1 AND deleted_at IS NOT NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Copy a workflow's states, transitions, requirements and actions into
    /// a new workflow with `new_code` and the next version number.
    ///
    /// Runs in a single transaction. Returns `None` if the source is absent.
    pub async fn duplicate(
        pool: &PgPool,
        source_id: DbId,
        new_code: &str,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO workflows (name, code, record_type, required_fields, is_active, is_default, version)
             SELECT name, $2, record_type, required_fields, true, false, version + 1
             FROM workflows WHERE id = $1 AND deleted_at IS NULL
             RETURNING {COLUMNS}"
        );
        let Some(copy) = sqlx::query_as::<_, Workflow>(&query)
            .bind(source_id)
            .bind(new_code)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let states: Vec<(DbId,)> =
            sqlx::query_as("SELECT id FROM workflow_states WHERE workflow_id = $1 ORDER BY id")
                .bind(source_id)
                .fetch_all(&mut *tx)
                .await?;

        let mut state_map: HashMap<DbId, DbId> = HashMap::with_capacity(states.len());
        for (old_id,) in states {
            let new_id: DbId = sqlx::query_scalar(
                "INSERT INTO workflow_states (workflow_id, name, code, state_type, sla_hours, viewable_role_ids)
                 SELECT $2, name, code, state_type, sla_hours, viewable_role_ids
                 FROM workflow_states WHERE id = $1
                 RETURNING id",
            )
            .bind(old_id)
            .bind(copy.id)
            .fetch_one(&mut *tx)
            .await?;
            state_map.insert(old_id, new_id);
        }

        let transitions: Vec<(DbId, DbId, DbId)> = sqlx::query_as(
            "SELECT id, from_state_id, to_state_id FROM workflow_transitions
             WHERE workflow_id = $1 ORDER BY id",
        )
        .bind(source_id)
        .fetch_all(&mut *tx)
        .await?;

        for (old_id, from_id, to_id) in transitions {
            let (Some(new_from), Some(new_to)) = (state_map.get(&from_id), state_map.get(&to_id))
            else {
                tracing::warn!(transition_id = old_id, "Skipping transition with foreign state");
                continue;
            };
            let new_id: DbId = sqlx::query_scalar(
                "INSERT INTO workflow_transitions (
                    workflow_id, name, from_state_id, to_state_id, is_active, allowed_role_ids,
                    assign_user_id, assignment_role_id, manual_select_user, auto_match_user,
                    assign_department_id, auto_detect_department)
                 SELECT $2, name, $3, $4, is_active, allowed_role_ids,
                    assign_user_id, assignment_role_id, manual_select_user, auto_match_user,
                    assign_department_id, auto_detect_department
                 FROM workflow_transitions WHERE id = $1
                 RETURNING id",
            )
            .bind(old_id)
            .bind(copy.id)
            .bind(new_from)
            .bind(new_to)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO transition_requirements (transition_id, requirement_type, is_mandatory, error_message, sort_order)
                 SELECT $2, requirement_type, is_mandatory, error_message, sort_order
                 FROM transition_requirements WHERE transition_id = $1 ORDER BY id",
            )
            .bind(old_id)
            .bind(new_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO transition_actions (transition_id, name, action_type, config, execution_order, is_async, is_active)
                 SELECT $2, name, action_type, config, execution_order, is_async, is_active
                 FROM transition_actions WHERE transition_id = $1 ORDER BY id",
            )
            .bind(old_id)
            .bind(new_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(copy))
    }
}
