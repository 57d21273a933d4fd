//! Symbolic recipient tokens used by notification and email actions.

use crate::error::CoreError;
use crate::types::DbId;

/// A parsed recipient token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientToken {
    /// The incident's current assignee.
    Assignee,
    /// The incident's reporter.
    Reporter,
    /// A specific user, `user:<id>`.
    User(DbId),
    /// Every active member of a role, `role:<code>`.
    Role(String),
    /// A literal address, `email:<addr>` (email actions only).
    Email(String),
}

impl RecipientToken {
    pub fn parse(token: &str) -> Result<Self, CoreError> {
        let token = token.trim();
        match token {
            "assignee" => return Ok(Self::Assignee),
            "reporter" => return Ok(Self::Reporter),
            _ => {}
        }
        let invalid = || CoreError::Validation(format!("Invalid recipient token '{token}'"));
        let (kind, rest) = token.split_once(':').ok_or_else(invalid)?;
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(invalid());
        }
        match kind {
            "user" => rest
                .parse::<DbId>()
                .ok()
                .filter(|id| *id > 0)
                .map(Self::User)
                .ok_or_else(invalid),
            "role" => Ok(Self::Role(rest.to_string())),
            "email" if rest.contains('@') => Ok(Self::Email(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}
