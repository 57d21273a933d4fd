//! Domain vocabulary for the incident workflow engine.
//!
//! This crate has no internal dependencies so it can be shared by the
//! repository layer, the engine and any future tooling.

pub mod action;
pub mod assignment;
pub mod error;
pub mod incident;
pub mod recipients;
pub mod requirement;
pub mod revision;
pub mod sla;
pub mod template;
pub mod types;
pub mod workflow;
