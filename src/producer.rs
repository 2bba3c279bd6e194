use std::sync::Arc;

use anyhow::{Error, Result};
use tracing::info;

use crate::{
    clients::EventPublisher,
    models::event::{Event, IngestRequest},
};

/// Turns validated requests into events on the main queue.
#[derive(Clone)]
pub struct Producer {
    publisher: Arc<dyn EventPublisher>,
}

impl Producer {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Assigns the event identity (unless the caller supplied one) and
    /// publishes persistently. Returns once the broker has accepted the
    /// message, not once it is delivered.
    pub async fn ingest(&self, request: IngestRequest) -> Result<Event, Error> {
        let event = Event::from_request(request);

        self.publisher.publish_event(&event).await?;

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Event accepted and queued"
        );

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clients::memory::MemoryBroker, topology::Topology};

    fn request() -> IngestRequest {
        serde_json::from_value(serde_json::json!({
            "eventType": "user_signup",
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": { "email": "user@example.com", "username": "john_doe" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn publishes_fresh_event_to_main_queue() {
        let broker = Arc::new(MemoryBroker::new(Topology::default()));
        let producer = Producer::new(broker.clone());

        let event = producer.ingest(request()).await.unwrap();
        let queued = Event::decode(&broker.try_recv().await.unwrap()).unwrap();

        assert_eq!(queued, event);
        assert_eq!(queued.retry_count, 0);
    }

    #[tokio::test]
    async fn surfaces_publish_failures() {
        let broker = Arc::new(MemoryBroker::new(Topology::default()));
        broker.set_unavailable(true);
        let producer = Producer::new(broker.clone());

        assert!(producer.ingest(request()).await.is_err());
        assert!(broker.try_recv().await.is_none());
    }
}
