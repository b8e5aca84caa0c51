//! Lifecycle event publishing.
//!
//! Publishing is best-effort: delivery runs on a spawned task per sink and a
//! failed delivery is only logged. The transfer store stays authoritative, so
//! a lost event never rolls back or blocks a state transition.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::event::{EventTopic, TransferEvent};
use crate::models::transfer::Transfer;

/// Channel capacity for the in-process bus.
const CHANNEL_CAPACITY: usize = 1024;

/// Errors raised while delivering an event to one sink.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery failed: {0}")]
    Transport(String),

    #[error("Endpoint responded with HTTP {0}")]
    Rejected(u16),
}

/// A destination for transfer lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Sink name used in logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &TransferEvent) -> Result<(), PublishError>;
}

/// Fans events out to every configured sink without waiting on delivery.
#[derive(Clone, Default)]
pub struct EventPublisher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventPublisher {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Publish `topic` for the current state of `transfer`.
    pub fn publish(&self, topic: EventTopic, transfer: &Transfer) {
        let event = Arc::new(TransferEvent::new(topic, transfer));

        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                match sink.deliver(&event).await {
                    Ok(()) => debug!(
                        sink = sink.name(),
                        topic = event.topic.as_str(),
                        transfer_reference = %event.transfer_reference,
                        "Event delivered"
                    ),
                    Err(e) => warn!(
                        sink = sink.name(),
                        topic = event.topic.as_str(),
                        transfer_reference = %event.transfer_reference,
                        error = %e,
                        "Event delivery failed"
                    ),
                }
            });
        }
    }
}

/// In-process event bus backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct ChannelEventSink {
    sender: broadcast::Sender<TransferEvent>,
}

impl ChannelEventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }
}

impl Default for ChannelEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn deliver(&self, event: &TransferEvent) -> Result<(), PublishError> {
        // No subscribers is not an error; events are fire-and-forget
        if self.sender.send(event.clone()).is_err() {
            debug!(topic = event.topic.as_str(), "No channel subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transfer::{NewTransfer, TransferType};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _event: &TransferEvent) -> Result<(), PublishError> {
            Err(PublishError::Transport("connection refused".to_string()))
        }
    }

    fn transfer() -> Transfer {
        NewTransfer {
            transfer_reference: "TRF-1".to_string(),
            idempotency_key: None,
            from_account_number: "A".to_string(),
            to_account_number: "B".to_string(),
            amount: dec!(5),
            currency: "USD".to_string(),
            description: None,
            transfer_type: TransferType::Internal,
        }
        .into_pending(Utc::now())
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_affect_others() {
        let channel = ChannelEventSink::new();
        let mut rx = channel.subscribe();
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(FailingSink), Arc::new(channel)];
        let publisher = EventPublisher::new(sinks);

        publisher.publish(EventTopic::Initiated, &transfer());

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.topic, EventTopic::Initiated);
        assert_eq!(event.transfer_reference, "TRF-1");
    }

    #[tokio::test]
    async fn test_channel_without_subscribers_is_ok() {
        let channel = ChannelEventSink::new();
        let event = TransferEvent::new(EventTopic::Completed, &transfer());
        assert!(channel.deliver(&event).await.is_ok());
    }
}
