//! Triage event bus and outbound delivery channels.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying [`IncidentEvent`]s. In-app
//!   notifications are published here for the notification consumer.
//! - [`delivery`]: external delivery channels (webhook, email) used by
//!   transition actions.

pub mod bus;
pub mod delivery;

pub use bus::{EventBus, IncidentEvent};
pub use delivery::email::{EmailConfig, EmailDelivery, EmailError};
pub use delivery::webhook::{WebhookDelivery, WebhookError, WebhookRequest};
