//! Repository for the `incidents` table and its multi-assignee set.

use sqlx::{PgPool, Postgres, Transaction};
use triage_core::action::FieldUpdate;
use triage_core::incident::format_incident_number;
use triage_core::types::{DbId, Timestamp};

use crate::models::history::TransitionHistory;
use crate::models::incident::{
    CreateIncident, Incident, IncidentPatch, SlaStatistics, TransitionCommit,
};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, incident_number, title, description, workflow_id, current_state_id, \
                        priority, severity, classification_id, location_id, department_id, \
                        assignee_id, reporter_id, custom_fields, sla_deadline, sla_breached, \
                        resolved_at, closed_at, converted_request_id, created_at, updated_at";

/// Column list for `transition_histories`.
const HISTORY_COLUMNS: &str =
    "id, incident_id, transition_id, from_state_id, to_state_id, performed_by, comment, created_at";

/// Provides persistence for incidents.
pub struct IncidentRepo;

impl IncidentRepo {
    /// Insert a new incident, allocating its `INC-nnnnnn` number from
    /// `incident_number_seq`.
    pub async fn create(pool: &PgPool, input: &CreateIncident) -> Result<Incident, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let seq: i64 = sqlx::query_scalar("SELECT nextval('incident_number_seq')")
            .fetch_one(&mut *tx)
            .await?;

        let query = format!(
            "INSERT INTO incidents (
                incident_number, title, description, workflow_id, current_state_id,
                priority, severity, classification_id, location_id, department_id,
                assignee_id, reporter_id, custom_fields, sla_deadline)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING {COLUMNS}"
        );
        let incident = sqlx::query_as::<_, Incident>(&query)
            .bind(format_incident_number(seq))
            .bind(&input.title)
            .bind(&input.description)
            .bind(input.workflow_id)
            .bind(input.current_state_id)
            .bind(input.priority)
            .bind(input.severity)
            .bind(input.classification_id)
            .bind(input.location_id)
            .bind(input.department_id)
            .bind(input.assignee_id)
            .bind(input.reporter_id)
            .bind(&input.custom_fields)
            .bind(input.sla_deadline)
            .fetch_one(&mut *tx)
            .await?;

        if let Some(assignee_id) = incident.assignee_id {
            sqlx::query("INSERT INTO incident_assignees (incident_id, user_id) VALUES ($1, $2)")
                .bind(incident.id)
                .bind(assignee_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(incident)
    }

    /// Find an incident by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Incident>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM incidents WHERE id = $1");
        sqlx::query_as::<_, Incident>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a transition's column writes and insert its history row in one
    /// transaction.
    ///
    /// The update is conditioned on `current_state_id` still equalling
    /// `expected_state_id`. Returns `None` (and writes nothing) when that
    /// check fails or the incident no longer exists.
    pub async fn commit_transition(
        pool: &PgPool,
        commit: &TransitionCommit,
    ) -> Result<Option<TransitionHistory>, sqlx::Error> {
        let update = &commit.update;
        let mut tx = pool.begin().await?;

        let updated: Option<DbId> = sqlx::query_scalar(
            "UPDATE incidents SET
                current_state_id = $3,
                department_id = COALESCE($4, department_id),
                assignee_id = COALESCE($5, assignee_id),
                sla_deadline = COALESCE($6, sla_deadline),
                sla_breached = CASE WHEN $6::timestamptz IS NULL THEN sla_breached ELSE FALSE END,
                closed_at = COALESCE($7, closed_at),
                resolved_at = COALESCE($8, resolved_at),
                updated_at = $9
             WHERE id = $1 AND current_state_id = $2
             RETURNING id",
        )
        .bind(commit.incident_id)
        .bind(commit.expected_state_id)
        .bind(update.to_state_id)
        .bind(update.department_id)
        .bind(update.assignee_id)
        .bind(update.sla_deadline)
        .bind(update.closed_at)
        .bind(update.resolved_at)
        .bind(update.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        if let Some(assignee_ids) = &update.assignee_ids {
            sqlx::query("DELETE FROM incident_assignees WHERE incident_id = $1")
                .bind(commit.incident_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO incident_assignees (incident_id, user_id)
                 SELECT $1, unnest($2::bigint[])
                 ON CONFLICT DO NOTHING",
            )
            .bind(commit.incident_id)
            .bind(assignee_ids)
            .execute(&mut *tx)
            .await?;
        }

        let history = &commit.history;
        let query = format!(
            "INSERT INTO transition_histories
                (incident_id, transition_id, from_state_id, to_state_id, performed_by, comment, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {HISTORY_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TransitionHistory>(&query)
            .bind(history.incident_id)
            .bind(history.transition_id)
            .bind(history.from_state_id)
            .bind(history.to_state_id)
            .bind(history.performed_by)
            .bind(&history.comment)
            .bind(update.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(row))
    }

    /// Apply a patch. Only non-`None` fields are written. A new assignee
    /// replaces the multi-assignee set.
    pub async fn update_fields(
        pool: &PgPool,
        id: DbId,
        patch: &IncidentPatch,
    ) -> Result<Option<Incident>, sqlx::Error> {
        let query = format!(
            "UPDATE incidents SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                priority = COALESCE($4, priority),
                severity = COALESCE($5, severity),
                classification_id = COALESCE($6, classification_id),
                location_id = COALESCE($7, location_id),
                department_id = COALESCE($8, department_id),
                assignee_id = COALESCE($9, assignee_id),
                custom_fields = COALESCE($10, custom_fields),
                updated_at = now()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let mut tx = pool.begin().await?;
        let incident = sqlx::query_as::<_, Incident>(&query)
            .bind(id)
            .bind(&patch.title)
            .bind(&patch.description)
            .bind(patch.priority)
            .bind(patch.severity)
            .bind(patch.classification_id)
            .bind(patch.location_id)
            .bind(patch.department_id)
            .bind(patch.assignee_id)
            .bind(&patch.custom_fields)
            .fetch_optional(&mut *tx)
            .await?;

        if incident.is_some() && patch.assignee_id.is_some() {
            Self::reset_assignees(&mut tx, id, patch.assignee_id).await?;
        }
        tx.commit().await?;
        Ok(incident)
    }

    /// Write one typed field as a `field_update` action does. Unlike
    /// [`update_fields`](Self::update_fields), id columns may be cleared.
    /// An assignee write replaces the multi-assignee set.
    pub async fn apply_field_update(
        pool: &PgPool,
        id: DbId,
        update: &FieldUpdate,
    ) -> Result<Option<Incident>, sqlx::Error> {
        // Column names come from a closed enum, never from input.
        let (column, value): (&str, Option<i64>) = match *update {
            FieldUpdate::Priority(v) => ("priority", Some(i64::from(v))),
            FieldUpdate::Severity(v) => ("severity", Some(i64::from(v))),
            FieldUpdate::AssigneeId(v) => ("assignee_id", v),
            FieldUpdate::DepartmentId(v) => ("department_id", v),
        };
        let cast = match update {
            FieldUpdate::Priority(_) | FieldUpdate::Severity(_) => "::smallint",
            _ => "",
        };
        let query = format!(
            "UPDATE incidents SET {column} = $2{cast}, updated_at = now()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let mut tx = pool.begin().await?;
        let incident = sqlx::query_as::<_, Incident>(&query)
            .bind(id)
            .bind(value)
            .fetch_optional(&mut *tx)
            .await?;

        if let (Some(_), FieldUpdate::AssigneeId(assignee_id)) = (&incident, update) {
            Self::reset_assignees(&mut tx, id, *assignee_id).await?;
        }
        tx.commit().await?;
        Ok(incident)
    }

    /// Make `assignee_id` the only member of the incident's assignee set,
    /// or empty the set when it is `None`.
    async fn reset_assignees(
        tx: &mut Transaction<'_, Postgres>,
        id: DbId,
        assignee_id: Option<DbId>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM incident_assignees WHERE incident_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if let Some(assignee_id) = assignee_id {
            sqlx::query("INSERT INTO incident_assignees (incident_id, user_id) VALUES ($1, $2)")
                .bind(id)
                .bind(assignee_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    /// Point the incident at the request record it was converted into.
    pub async fn mark_converted(
        pool: &PgPool,
        id: DbId,
        request_id: DbId,
    ) -> Result<Option<Incident>, sqlx::Error> {
        let query = format!(
            "UPDATE incidents SET converted_request_id = $2, updated_at = now()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Incident>(&query)
            .bind(id)
            .bind(request_id)
            .fetch_optional(pool)
            .await
    }

    /// All assignee user ids of an incident, ascending.
    pub async fn list_assignees(pool: &PgPool, id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT user_id FROM incident_assignees WHERE incident_id = $1 ORDER BY user_id",
        )
        .bind(id)
        .fetch_all(pool)
        .await
    }

    /// Open incidents whose deadline is strictly before `now` and which are
    /// not yet flagged.
    pub async fn find_sla_overdue(
        pool: &PgPool,
        now: Timestamp,
    ) -> Result<Vec<Incident>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM incidents
             WHERE sla_breached = FALSE
               AND sla_deadline IS NOT NULL
               AND sla_deadline < $1
               AND closed_at IS NULL
             ORDER BY sla_deadline, id"
        );
        sqlx::query_as::<_, Incident>(&query)
            .bind(now)
            .fetch_all(pool)
            .await
    }

    /// Flag incidents breached. Already-flagged rows are skipped, so the
    /// returned count only covers new markings.
    pub async fn mark_sla_breached(pool: &PgPool, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE incidents SET sla_breached = TRUE, updated_at = now()
             WHERE id = ANY($1) AND sla_breached = FALSE",
        )
        .bind(ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Counts of open incidents by stage and of breached ones.
    ///
    /// `open` counts incidents sitting in an initial state, `in_progress`
    /// those in a normal state; closed incidents are excluded throughout.
    pub async fn sla_statistics(pool: &PgPool) -> Result<SlaStatistics, sqlx::Error> {
        sqlx::query_as::<_, SlaStatistics>(
            "SELECT
                COUNT(*) FILTER (WHERE s.state_type = 'initial') AS open,
                COUNT(*) FILTER (WHERE s.state_type = 'normal') AS in_progress,
                COUNT(*) FILTER (WHERE i.sla_breached) AS breached
             FROM incidents i
             JOIN workflow_states s ON s.id = i.current_state_id
             WHERE i.closed_at IS NULL",
        )
        .fetch_one(pool)
        .await
    }
}
