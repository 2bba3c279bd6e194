//! Seams between the pipeline and its backing services.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    event::Event, ledger::LedgerRecord, notification::NotificationPayload,
    status::DeliveryStatus,
};

pub mod database;
pub mod health;
pub mod memory;
pub mod rbmq;
pub mod transport;

/// Persistent idempotency and status record, keyed by event id.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// True once the event reached `SENT` or `FAILED_DLQ`.
    async fn is_handled(&self, event_id: &str) -> Result<bool>;

    /// Inserts a `QUEUED` record with zero attempts. A record that already
    /// exists is left untouched.
    async fn create_if_absent(&self, event: &Event) -> Result<()>;

    /// Sets the status, stamps the attempt time and bumps the attempt count.
    async fn update_status(&self, event_id: &str, status: DeliveryStatus) -> Result<()>;

    async fn find(&self, event_id: &str) -> Result<Option<LedgerRecord>>;

    async fn health_check(&self) -> Result<()>;
}

/// Write side of the delivery topology.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Persistent publish to the main queue.
    async fn publish_event(&self, event: &Event) -> Result<()>;

    /// Publishes through the retry exchange and returns the TTL of the delay
    /// tier that received the message.
    async fn publish_retry(&self, event: &Event, delay_ms: u64) -> Result<u64>;

    async fn publish_dead_letter(&self, event: &Event) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

/// External notification delivery. Any error counts as a failed attempt.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send(&self, notification: &NotificationPayload) -> Result<()>;
}
