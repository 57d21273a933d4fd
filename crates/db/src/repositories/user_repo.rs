//! Read-only access to the user directory for assignment and recipient
//! resolution.

use sqlx::PgPool;
use triage_core::types::DbId;

use crate::models::user::{User, UserMatchQuery};

/// Column list, prefixed for joins.
const COLUMNS: &str = "u.id, u.username, u.full_name, u.email, u.is_active, u.department_id, \
                        u.location_id, u.created_at, u.updated_at";

pub struct UserRepo;

impl UserRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM users u WHERE u.id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Active members of a role matching every supplied filter, by id.
    ///
    /// The classification filter matches through `user_classifications`;
    /// location and department match the user's own columns.
    pub async fn find_matching(
        pool: &PgPool,
        criteria: &UserMatchQuery,
    ) -> Result<Vec<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users u
             JOIN user_roles ur ON ur.user_id = u.id AND ur.role_id = $1
             WHERE u.is_active
               AND ($2::bigint IS NULL OR EXISTS (
                    SELECT 1 FROM user_classifications uc
                    WHERE uc.user_id = u.id AND uc.classification_id = $2))
               AND ($3::bigint IS NULL OR u.location_id = $3)
               AND ($4::bigint IS NULL OR u.department_id = $4)
               AND ($5::bigint IS NULL OR u.id <> $5)
             ORDER BY u.id"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(criteria.role_id)
            .bind(criteria.classification_id)
            .bind(criteria.location_id)
            .bind(criteria.department_id)
            .bind(criteria.exclude_user_id)
            .fetch_all(pool)
            .await
    }

    /// Active members of the role with the given code, by id.
    pub async fn list_by_role_code(pool: &PgPool, code: &str) -> Result<Vec<User>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM users u
             JOIN user_roles ur ON ur.user_id = u.id
             JOIN roles r ON r.id = ur.role_id
             WHERE r.code = $1 AND u.is_active
             ORDER BY u.id"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(code)
            .fetch_all(pool)
            .await
    }
}
