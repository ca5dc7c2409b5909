//! Event bus: broadcast events to all connected WebSocket clients

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use torq_core::AgentEvent;

use crate::protocol::{GatewayEvent, events};

/// Broadcast event bus for the gateway
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GatewayEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Each WebSocket connection gets its own receiver
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn broadcast(&self, event: GatewayEvent) {
        let receivers = self.sender.receiver_count();
        if receivers > 0 {
            debug!(
                "Broadcasting event '{}' to {} receivers",
                event.event, receivers
            );
            // No receivers left is fine
            let _ = self.sender.send(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Forward orchestrator status changes to the bus as `agent.status` events
pub fn spawn_agent_event_forwarder(
    mut rx: mpsc::Receiver<AgentEvent>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_value(&event).unwrap_or_default();
            bus.broadcast(GatewayEvent::new(events::AGENT_STATUS, data));
        }
        debug!("Agent event channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use torq_core::AgentStatus;

    #[tokio::test]
    async fn test_event_bus_broadcast() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.broadcast(GatewayEvent::new("test.event", serde_json::json!({"key": "value"})));

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event, "test.event");
        assert_eq!(e2.event, "test.event");
    }

    #[test]
    fn test_event_bus_no_receivers() {
        let bus = EventBus::new(16);
        bus.broadcast(GatewayEvent::new("test", serde_json::json!({})));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_bus_subscriber_count() {
        let bus = EventBus::new(16);
        let rx1 = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_agent_event_forwarder() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_agent_event_forwarder(rx, bus.clone());

        tx.send(AgentEvent {
            agent_id: "debugging".to_string(),
            status: AgentStatus::Thinking,
            timestamp: chrono::Utc::now(),
        })
        .await
        .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event, events::AGENT_STATUS);
        assert_eq!(event.data["agent_id"], "debugging");
        assert_eq!(event.data["status"], "thinking");

        drop(tx);
        handle.await.unwrap();
    }
}
