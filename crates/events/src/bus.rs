//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the workflow engine
//! and whatever consumes incident events (in-app notification fan-out,
//! websocket push, audit sinks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use triage_core::types::DbId;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An in-app notification produced by a `notification` action.
pub const EVENT_NOTIFICATION: &str = "incident.notification";

// ---------------------------------------------------------------------------
// IncidentEvent
// ---------------------------------------------------------------------------

/// Something that happened to an incident.
///
/// Built with [`IncidentEvent::new`] and the `with_*` builder methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    /// Dot-separated event name, e.g. `"incident.notification"`.
    pub event_type: String,

    pub incident_id: DbId,

    /// User that triggered the event, if any.
    pub actor_user_id: Option<DbId>,

    /// Users the event is addressed to. Empty for broadcast events.
    pub recipient_user_ids: Vec<DbId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl IncidentEvent {
    pub fn new(event_type: impl Into<String>, incident_id: DbId) -> Self {
        Self {
            event_type: event_type.into(),
            incident_id,
            actor_user_id: None,
            recipient_user_ids: Vec::new(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_actor(mut self, user_id: DbId) -> Self {
        self.actor_user_id = Some(user_id);
        self
    }

    pub fn with_recipients(mut self, user_ids: Vec<DbId>) -> Self {
        self.recipient_user_ids = user_ids;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<IncidentEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Returns the number of
    /// subscribers reached (zero drops the event).
    pub fn publish(&self, event: IncidentEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IncidentEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
