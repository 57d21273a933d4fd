//! Outbound delivery seam used by transition actions.

use std::sync::Arc;

use async_trait::async_trait;
use triage_core::types::DbId;
use triage_events::bus::EVENT_NOTIFICATION;
use triage_events::{
    EmailDelivery, EmailError, EventBus, IncidentEvent, WebhookDelivery, WebhookError,
    WebhookRequest,
};

/// An in-app notification for resolved users.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub incident_id: DbId,
    pub actor_id: DbId,
    pub recipient_user_ids: Vec<DbId>,
    pub title: String,
    pub message: String,
}

/// A plain-text email for resolved addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub incident_id: DbId,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("Email delivery is not configured")]
    EmailDisabled,

    #[error("Delivery failed: {0}")]
    Other(String),
}

/// Sends what actions produce. Every call can fail independently of the
/// transition that triggered it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn notify(&self, message: &NotificationMessage) -> Result<(), TransportError>;

    async fn send_email(&self, message: &EmailMessage) -> Result<(), TransportError>;

    /// Returns the response status.
    async fn call_webhook(&self, request: &WebhookRequest) -> Result<u16, TransportError>;
}

// ---------------------------------------------------------------------------
// DeliveryTransport
// ---------------------------------------------------------------------------

/// Production transport: notifications go onto the event bus, email over
/// SMTP (when configured) and webhooks over HTTP.
pub struct DeliveryTransport {
    bus: Arc<EventBus>,
    email: Option<EmailDelivery>,
    webhook: WebhookDelivery,
}

impl DeliveryTransport {
    pub fn new(bus: Arc<EventBus>, email: Option<EmailDelivery>, webhook: WebhookDelivery) -> Self {
        Self {
            bus,
            email,
            webhook,
        }
    }
}

#[async_trait]
impl Transport for DeliveryTransport {
    async fn notify(&self, message: &NotificationMessage) -> Result<(), TransportError> {
        let event = IncidentEvent::new(EVENT_NOTIFICATION, message.incident_id)
            .with_actor(message.actor_id)
            .with_recipients(message.recipient_user_ids.clone())
            .with_payload(serde_json::json!({
                "title": message.title,
                "message": message.message,
            }));
        let delivered = self.bus.publish(event);
        if delivered == 0 {
            tracing::debug!(
                incident_id = message.incident_id,
                "Notification published with no subscribers"
            );
        }
        Ok(())
    }

    async fn send_email(&self, message: &EmailMessage) -> Result<(), TransportError> {
        let email = self.email.as_ref().ok_or(TransportError::EmailDisabled)?;
        email
            .send(&message.to, &message.subject, &message.body)
            .await?;
        Ok(())
    }

    async fn call_webhook(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        Ok(self.webhook.send(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn transport(bus: Arc<EventBus>) -> DeliveryTransport {
        let webhook = WebhookDelivery::new(Duration::from_secs(1)).unwrap();
        DeliveryTransport::new(bus, None, webhook)
    }

    #[tokio::test]
    async fn notify_publishes_on_the_bus() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();

        transport(bus.clone())
            .notify(&NotificationMessage {
                incident_id: 11,
                actor_id: 2,
                recipient_user_ids: vec![5, 6],
                title: "Assigned".into(),
                message: "INC-000011 is yours".into(),
            })
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EVENT_NOTIFICATION);
        assert_eq!(event.incident_id, 11);
        assert_eq!(event.recipient_user_ids, vec![5, 6]);
        assert_eq!(event.payload["message"], "INC-000011 is yours");
    }

    #[tokio::test]
    async fn async_notification_reaches_the_bus_once_drained() {
        use triage_db::models::workflow::CreateTransitionAction;

        use crate::actions::{ActionContext, ActionExecutor};
        use crate::config::EngineConfig;
        use crate::memory::{fixtures, MemoryStore};
        use crate::store::Collaborators;

        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let store = Arc::new(MemoryStore::new());
        let flow = fixtures::basic_workflow(&store);
        let incident = fixtures::open_incident(&store, &flow).await.unwrap();
        let collaborators = Collaborators::from_store(store.clone(), Arc::new(transport(bus)));
        let executor = ActionExecutor::new(&collaborators, &EngineConfig::default());

        let notify = store.add_action(&CreateTransitionAction {
            transition_id: flow.start.id,
            name: Some("notify".into()),
            action_type: "notification".into(),
            config: serde_json::json!({
                "recipients": ["user:9"],
                "title": "{{incident_number}}",
                "message": "moved to {{to_state}}"
            }),
            execution_order: Some(0),
            is_async: Some(true),
        });
        let context = ActionContext {
            incident: incident.clone(),
            transition_name: "Start work".into(),
            from_state: "Open".into(),
            to_state: "In Progress".into(),
            performed_by: 1,
        };

        assert!(executor.execute(&[notify], context).await.is_empty());
        executor.drain().await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.incident_id, incident.id);
        assert_eq!(event.recipient_user_ids, vec![9]);
        assert_eq!(event.payload["message"], "moved to In Progress");
    }

    #[tokio::test]
    async fn email_without_smtp_config_is_disabled() {
        let result = transport(Arc::new(EventBus::default()))
            .send_email(&EmailMessage {
                incident_id: 1,
                to: vec!["a@example.com".into()],
                subject: "s".into(),
                body: "b".into(),
            })
            .await;
        assert_matches!(result, Err(TransportError::EmailDisabled));
    }
}
