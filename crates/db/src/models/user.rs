//! Directory user model and the auto-match query.

use serde::Serialize;
use sqlx::FromRow;
use triage_core::types::{DbId, Timestamp};

/// A row from the `users` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub is_active: bool,
    pub department_id: Option<DbId>,
    pub location_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    /// Name shown in notifications: full name when set, else username.
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            &self.username
        } else {
            &self.full_name
        }
    }
}

/// Filter for role-based candidate lookup. `None` filters are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMatchQuery {
    pub role_id: DbId,
    pub classification_id: Option<DbId>,
    pub location_id: Option<DbId>,
    pub department_id: Option<DbId>,
    pub exclude_user_id: Option<DbId>,
}

impl UserMatchQuery {
    /// Query on role membership alone.
    pub fn role_only(role_id: DbId) -> Self {
        Self {
            role_id,
            ..Default::default()
        }
    }
}
