//! Repository for the append-only `incident_revisions` table.

use sqlx::PgPool;
use triage_core::types::DbId;

use crate::models::revision::{CreateRevision, Revision};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str =
    "id, incident_id, revision_number, action_type, description, changes, performed_by, created_at";

/// Append and list revisions. Rows are never updated or deleted.
pub struct RevisionRepo;

impl RevisionRepo {
    /// Append a revision with the incident's next number.
    ///
    /// The incident row is locked for the duration of the transaction so
    /// concurrent writers on the same incident allocate numbers one at a
    /// time; the unique `(incident_id, revision_number)` constraint backs
    /// this up.
    pub async fn append(pool: &PgPool, input: &CreateRevision) -> Result<Revision, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT id FROM incidents WHERE id = $1 FOR UPDATE")
            .bind(input.incident_id)
            .fetch_one(&mut *tx)
            .await?;

        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(revision_number), 0) + 1
             FROM incident_revisions WHERE incident_id = $1",
        )
        .bind(input.incident_id)
        .fetch_one(&mut *tx)
        .await?;

        let query = format!(
            "INSERT INTO incident_revisions
                (incident_id, revision_number, action_type, description, changes, performed_by)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {COLUMNS}"
        );
        let revision = sqlx::query_as::<_, Revision>(&query)
            .bind(input.incident_id)
            .bind(next)
            .bind(&input.action_type)
            .bind(&input.description)
            .bind(&input.changes)
            .bind(input.performed_by)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(revision)
    }

    /// Revisions of an incident by ascending number.
    pub async fn list_for_incident(
        pool: &PgPool,
        incident_id: DbId,
    ) -> Result<Vec<Revision>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM incident_revisions
             WHERE incident_id = $1 ORDER BY revision_number"
        );
        sqlx::query_as::<_, Revision>(&query)
            .bind(incident_id)
            .fetch_all(pool)
            .await
    }
}
