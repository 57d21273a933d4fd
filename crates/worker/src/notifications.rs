use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use triage_events::bus::EVENT_NOTIFICATION;
use triage_events::IncidentEvent;

/// Log in-app notifications published on the event bus until cancelled or
/// the bus closes.
pub async fn run(mut receiver: broadcast::Receiver<IncidentEvent>, cancel: CancellationToken) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = receiver.recv() => received,
        };
        match received {
            Ok(event) if event.event_type == EVENT_NOTIFICATION => {
                tracing::info!(
                    incident_id = event.incident_id,
                    actor_user_id = ?event.actor_user_id,
                    recipients = ?event.recipient_user_ids,
                    title = %event.payload["title"],
                    "Notification delivered"
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Notification consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event bus closed, notification consumer shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use triage_events::EventBus;

    use super::*;

    #[tokio::test]
    async fn consumer_exits_on_cancel() {
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(bus.subscribe(), cancel.clone()));

        assert_eq!(bus.publish(IncidentEvent::new(EVENT_NOTIFICATION, 7)), 1);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn consumer_exits_when_bus_closes() {
        let bus = EventBus::default();
        let handle = tokio::spawn(run(bus.subscribe(), CancellationToken::new()));

        drop(bus);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
