//! Workflow-driven incident transitions.
//!
//! - [`engine::TransitionEngine`]: validates and commits state transitions.
//! - [`assignment::AssignmentResolver`]: picks assignees from a transition's
//!   assignment policy.
//! - [`actions::ActionExecutor`]: runs the notification, email, webhook and
//!   field-update side effects attached to a transition.
//! - [`sla_monitor::SlaMonitor`]: background scan marking overdue incidents.
//! - [`revision::RevisionWriter`]: append-only per-incident audit log.
//! - [`incidents::IncidentService`]: incident creation, field edits and
//!   comments, each audited.
//!
//! Persistence and delivery are reached through the traits in [`store`] and
//! [`transport`]. [`pg::PgStore`] backs them with Postgres;
//! [`memory::MemoryStore`] keeps everything in process.

pub mod actions;
pub mod assignment;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod incidents;
pub mod memory;
pub mod outcome;
pub mod pg;
pub mod revision;
pub mod sla_monitor;
pub mod store;
pub mod transport;

pub use actions::ActionExecutor;
pub use assignment::AssignmentResolver;
pub use config::{EngineConfig, SlaMonitorConfig};
pub use definition::DefinitionService;
pub use engine::{FeedbackInput, TransitionEngine, TransitionRequest};
pub use error::{WorkflowError, WorkflowResult};
pub use incidents::{IncidentService, NewIncident};
pub use outcome::{SideEffectFailure, SideEffectStage, TransitionOutcome};
pub use revision::RevisionWriter;
pub use sla_monitor::{Clock, SlaMonitor, SlaScanReport, SystemClock};
pub use store::Collaborators;
