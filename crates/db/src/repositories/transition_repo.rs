//! Repository for `workflow_transitions` and the requirement and action
//! rows attached to them.

use sqlx::PgPool;
use triage_core::types::DbId;

use crate::models::workflow::{
    CreateTransition, CreateTransitionAction, CreateTransitionRequirement, Transition,
    TransitionAction, TransitionRequirement, TransitionWithRelations,
};

/// Column list for `workflow_transitions`.
const COLUMNS: &str = "id, workflow_id, name, from_state_id, to_state_id, is_active, \
                        allowed_role_ids, assign_user_id, assignment_role_id, \
                        manual_select_user, auto_match_user, assign_department_id, \
                        auto_detect_department, created_at, updated_at";

/// Column list for `transition_requirements`.
const REQUIREMENT_COLUMNS: &str =
    "id, transition_id, requirement_type, is_mandatory, error_message, sort_order";

/// Column list for `transition_actions`.
const ACTION_COLUMNS: &str =
    "id, transition_id, name, action_type, config, execution_order, is_async, is_active";

/// Provides CRUD and relation loading for transitions.
pub struct TransitionRepo;

impl TransitionRepo {
    /// Insert a new transition, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateTransition) -> Result<Transition, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_transitions (
                workflow_id, name, from_state_id, to_state_id, allowed_role_ids,
                assign_user_id, assignment_role_id, manual_select_user, auto_match_user,
                assign_department_id, auto_detect_department)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Transition>(&query)
            .bind(input.workflow_id)
            .bind(&input.name)
            .bind(input.from_state_id)
            .bind(input.to_state_id)
            .bind(&input.allowed_role_ids)
            .bind(input.assign_user_id)
            .bind(input.assignment_role_id)
            .bind(input.manual_select_user)
            .bind(input.auto_match_user)
            .bind(input.assign_department_id)
            .bind(input.auto_detect_department)
            .fetch_one(pool)
            .await
    }

    /// Find a transition by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Transition>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflow_transitions WHERE id = $1");
        sqlx::query_as::<_, Transition>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a transition together with its requirements and actions.
    pub async fn find_with_relations(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<TransitionWithRelations>, sqlx::Error> {
        let Some(transition) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };
        let requirements = Self::list_requirements(pool, id).await?;
        let actions = Self::list_actions(pool, id).await?;
        Ok(Some(TransitionWithRelations {
            transition,
            requirements,
            actions,
        }))
    }

    /// Transitions leaving a state, active or not.
    pub async fn list_from_state(
        pool: &PgPool,
        state_id: DbId,
    ) -> Result<Vec<Transition>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_transitions WHERE from_state_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, Transition>(&query)
            .bind(state_id)
            .fetch_all(pool)
            .await
    }

    /// All transitions of a workflow.
    pub async fn list_for_workflow(
        pool: &PgPool,
        workflow_id: DbId,
    ) -> Result<Vec<Transition>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_transitions WHERE workflow_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, Transition>(&query)
            .bind(workflow_id)
            .fetch_all(pool)
            .await
    }

    /// Attach a requirement to a transition.
    pub async fn add_requirement(
        pool: &PgPool,
        input: &CreateTransitionRequirement,
    ) -> Result<TransitionRequirement, sqlx::Error> {
        let query = format!(
            "INSERT INTO transition_requirements (transition_id, requirement_type, is_mandatory, error_message, sort_order)
             VALUES ($1, $2, $3, $4, COALESCE($5, 0))
             RETURNING {REQUIREMENT_COLUMNS}"
        );
        sqlx::query_as::<_, TransitionRequirement>(&query)
            .bind(input.transition_id)
            .bind(&input.requirement_type)
            .bind(input.is_mandatory)
            .bind(&input.error_message)
            .bind(input.sort_order)
            .fetch_one(pool)
            .await
    }

    /// Attach an action to a transition.
    pub async fn add_action(
        pool: &PgPool,
        input: &CreateTransitionAction,
    ) -> Result<TransitionAction, sqlx::Error> {
        let query = format!(
            "INSERT INTO transition_actions (transition_id, name, action_type, config, execution_order, is_async)
             VALUES ($1, COALESCE($2, ''), $3, $4, COALESCE($5, 0), COALESCE($6, false))
             RETURNING {ACTION_COLUMNS}"
        );
        sqlx::query_as::<_, TransitionAction>(&query)
            .bind(input.transition_id)
            .bind(&input.name)
            .bind(&input.action_type)
            .bind(&input.config)
            .bind(input.execution_order)
            .bind(input.is_async)
            .fetch_one(pool)
            .await
    }

    /// Requirements of a transition in declaration order.
    pub async fn list_requirements(
        pool: &PgPool,
        transition_id: DbId,
    ) -> Result<Vec<TransitionRequirement>, sqlx::Error> {
        let query = format!(
            "SELECT {REQUIREMENT_COLUMNS} FROM transition_requirements
             WHERE transition_id = $1 ORDER BY sort_order, id"
        );
        sqlx::query_as::<_, TransitionRequirement>(&query)
            .bind(transition_id)
            .fetch_all(pool)
            .await
    }

    /// Actions of a transition by ascending execution order; ties keep
    /// insertion order.
    pub async fn list_actions(
        pool: &PgPool,
        transition_id: DbId,
    ) -> Result<Vec<TransitionAction>, sqlx::Error> {
        let query = format!(
            "SELECT {ACTION_COLUMNS} FROM transition_actions
             WHERE transition_id = $1 ORDER BY execution_order, id"
        );
        sqlx::query_as::<_, TransitionAction>(&query)
            .bind(transition_id)
            .fetch_all(pool)
            .await
    }
}
