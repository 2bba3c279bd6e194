//! Per-message processing and the consume loop.
//!
//! Each delivery moves through
//! `RECEIVED -> CHECK_IDEMPOTENCY -> {SKIP | DELIVER} -> {SUCCESS | RETRY_SCHEDULED | DEAD_LETTERED}`.
//! A handler that returns `Ok` is acknowledged; an `Err` is negatively
//! acknowledged with requeue so the broker delivers it again later.

use std::{future::Future, sync::Arc};

use futures_util::StreamExt;
use lapin::{
    Consumer,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{DeliveryTransport, EventPublisher, Ledger},
    error::ProcessingError,
    models::{event::Event, notification::NotificationPayload, status::DeliveryStatus},
    topology::Topology,
};

/// Terminal result of handling one message. Every variant is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Unparseable content; dropped.
    Dropped,
    /// Already `SENT` or `FAILED_DLQ`.
    Skipped,
    Sent,
    RetryScheduled { retry_count: u32, tier_ms: u64 },
    DeadLettered,
}

pub struct EventProcessor {
    ledger: Arc<dyn Ledger>,
    publisher: Arc<dyn EventPublisher>,
    transport: Arc<dyn DeliveryTransport>,
    topology: Topology,
    max_retries: u32,
}

impl EventProcessor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        publisher: Arc<dyn EventPublisher>,
        transport: Arc<dyn DeliveryTransport>,
        topology: Topology,
        max_retries: u32,
    ) -> Self {
        Self {
            ledger,
            publisher,
            transport,
            topology,
            max_retries,
        }
    }

    pub async fn handle(&self, data: &[u8]) -> Result<Outcome, ProcessingError> {
        let event = match Event::decode(data) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    error = %e,
                    size = data.len(),
                    "Dropping malformed message"
                );
                return Ok(Outcome::Dropped);
            }
        };

        info!(
            event_id = %event.id,
            retry_count = event.retry_count,
            "Processing event"
        );

        let handled = self
            .ledger
            .is_handled(&event.id)
            .await
            .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

        if handled {
            info!(event_id = %event.id, "Event already handled, skipping");
            return Ok(Outcome::Skipped);
        }

        self.ledger
            .create_if_absent(&event)
            .await
            .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

        let notification = NotificationPayload::from_event(&event);

        match self.transport.send(&notification).await {
            Ok(()) => {
                self.ledger
                    .update_status(&event.id, DeliveryStatus::Sent)
                    .await
                    .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

                info!(event_id = %event.id, "Event delivered");
                Ok(Outcome::Sent)
            }
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    retry_count = event.retry_count,
                    error = %e,
                    "Delivery failed"
                );
                self.handle_failure(event).await
            }
        }
    }

    async fn handle_failure(&self, mut event: Event) -> Result<Outcome, ProcessingError> {
        if event.retry_count >= self.max_retries {
            error!(
                event_id = %event.id,
                max_retries = self.max_retries,
                "Retries exhausted, moving event to dead letter queue"
            );

            // FAILED_DLQ is terminal, so it is only recorded once the dead
            // letter is safely published.
            self.publisher
                .publish_dead_letter(&event)
                .await
                .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

            self.ledger
                .update_status(&event.id, DeliveryStatus::FailedDlq)
                .await
                .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

            return Ok(Outcome::DeadLettered);
        }

        event.retry_count += 1;
        let delay_ms = self.topology.retry_delay_ms(event.retry_count);

        self.ledger
            .update_status(&event.id, DeliveryStatus::FailedRetrying)
            .await
            .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

        let tier_ms = self
            .publisher
            .publish_retry(&event, delay_ms)
            .await
            .map_err(|e| ProcessingError::bookkeeping(&event.id, e))?;

        info!(
            event_id = %event.id,
            retry_count = event.retry_count,
            max_retries = self.max_retries,
            tier_ms,
            "Retry scheduled"
        );

        Ok(Outcome::RetryScheduled {
            retry_count: event.retry_count,
            tier_ms,
        })
    }
}

/// Consumes until `shutdown` resolves or the broker ends the stream, one
/// spawned task per delivery. In-flight tasks are awaited before returning.
/// The prefetch limit set on the channel bounds how many run at once.
pub async fn run_consumer<S>(
    processor: Arc<EventProcessor>,
    mut consumer: Consumer,
    shutdown: S,
) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    let mut in_flight = JoinSet::new();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting deliveries");
                break Ok(());
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => {
                    let processor = Arc::clone(&processor);
                    in_flight.spawn(async move { settle(&processor, delivery).await });
                }
                Some(Err(e)) => {
                    error!(error = %e, "Consumer stream failed");
                    break Err(anyhow::anyhow!("Consumer stream failed: {}", e));
                }
                None => {
                    info!("Consumer stream closed by broker");
                    break Ok(());
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Message handler task panicked");
                }
            }
        }
    };

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "Waiting for in-flight messages");
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Message handler task panicked");
        }
    }

    result
}

async fn settle(processor: &EventProcessor, delivery: Delivery) {
    match processor.handle(&delivery.data).await {
        Ok(outcome) => {
            debug!(?outcome, delivery_tag = delivery.delivery_tag, "Acknowledging");
            if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                error!(error = %e, "Failed to acknowledge message");
            }
        }
        Err(e) => {
            error!(error = %e, "Bookkeeping failed, returning message to the queue");
            let options = BasicNackOptions {
                requeue: true,
                ..Default::default()
            };
            if let Err(e) = delivery.acker.nack(options).await {
                error!(error = %e, "Failed to negatively acknowledge message");
            }
        }
    }
}
