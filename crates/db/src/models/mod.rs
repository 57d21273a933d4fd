//! Entity models and DTOs, one module per table group.

pub mod history;
pub mod incident;
pub mod revision;
pub mod user;
pub mod workflow;
