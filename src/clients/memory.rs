//! In-process ledger and broker.
//!
//! `MemoryBroker` has no broker-side TTL or dead-letter forwarding, so delay
//! tiers are emulated with timers: a retry publish sleeps for the selected
//! tier's TTL and then re-enqueues the message at the back of the main queue.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::{Mutex, mpsc},
    time::{Duration, sleep},
};
use tracing::debug;

use crate::{
    clients::{EventPublisher, Ledger},
    models::{event::Event, ledger::LedgerRecord, status::DeliveryStatus},
    topology::Topology,
};

#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<String, LedgerRecord>>,
    create_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every ledger call fails like an unreachable database.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("Ledger storage unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn is_handled(&self, event_id: &str) -> Result<bool> {
        self.ensure_available()?;

        Ok(self
            .records
            .lock()
            .await
            .get(event_id)
            .is_some_and(|record| record.status.is_terminal()))
    }

    async fn create_if_absent(&self, event: &Event) -> Result<()> {
        self.ensure_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let payload = serde_json::to_value(&event.payload)?;

        self.records
            .lock()
            .await
            .entry(event.id.clone())
            .or_insert_with(|| LedgerRecord {
                notification_id: event.notification_id(),
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                payload,
                status: DeliveryStatus::Queued,
                attempt_count: 0,
                last_attempt_timestamp: None,
            });

        Ok(())
    }

    async fn update_status(&self, event_id: &str, status: DeliveryStatus) -> Result<()> {
        self.ensure_available()?;

        if let Some(record) = self.records.lock().await.get_mut(event_id) {
            record.status = status;
            record.attempt_count += 1;
            record.last_attempt_timestamp = Some(Utc::now());
        }

        Ok(())
    }

    async fn find(&self, event_id: &str) -> Result<Option<LedgerRecord>> {
        self.ensure_available()?;
        Ok(self.records.lock().await.get(event_id).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}

/// A retry as routed by the retry exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub event_id: String,
    pub retry_count: u32,
    pub tier_ms: u64,
}

pub struct MemoryBroker {
    topology: Topology,
    main_tx: mpsc::UnboundedSender<Vec<u8>>,
    main_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    dead_letters: Mutex<Vec<Event>>,
    retries: Mutex<Vec<ScheduledRetry>>,
    unavailable: AtomicBool,
}

impl MemoryBroker {
    pub fn new(topology: Topology) -> Self {
        let (main_tx, main_rx) = mpsc::unbounded_channel();

        Self {
            topology,
            main_tx,
            main_rx: Mutex::new(main_rx),
            dead_letters: Mutex::new(Vec::new()),
            retries: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// While set, every publish fails like a dropped broker channel.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Enqueues raw bytes on the main queue, bypassing serialisation.
    pub fn publish_raw(&self, data: Vec<u8>) -> Result<()> {
        self.main_tx
            .send(data)
            .map_err(|_| anyhow!("Main queue is closed"))
    }

    /// Puts an unacknowledged message back on the main queue.
    pub fn requeue(&self, data: Vec<u8>) -> Result<()> {
        self.publish_raw(data)
    }

    /// Next message from the main queue, waiting for delayed retries to come
    /// back. Consumers calling this concurrently each get distinct messages.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.main_rx.lock().await.recv().await
    }

    pub async fn try_recv(&self) -> Option<Vec<u8>> {
        self.main_rx.lock().await.try_recv().ok()
    }

    pub async fn dead_letters(&self) -> Vec<Event> {
        self.dead_letters.lock().await.clone()
    }

    pub async fn retries(&self) -> Vec<ScheduledRetry> {
        self.retries.lock().await.clone()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("Broker channel unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish_event(&self, event: &Event) -> Result<()> {
        self.ensure_available()?;
        self.publish_raw(serde_json::to_vec(event)?)
    }

    async fn publish_retry(&self, event: &Event, delay_ms: u64) -> Result<u64> {
        self.ensure_available()?;

        let tier_ms = self.topology.select_tier(delay_ms).ttl_ms;
        let data = serde_json::to_vec(event)?;
        let main_tx = self.main_tx.clone();

        self.retries.lock().await.push(ScheduledRetry {
            event_id: event.id.clone(),
            retry_count: event.retry_count,
            tier_ms,
        });

        tokio::spawn(async move {
            sleep(Duration::from_millis(tier_ms)).await;
            if main_tx.send(data).is_err() {
                debug!("Main queue closed before delayed message expired");
            }
        });

        Ok(tier_ms)
    }

    async fn publish_dead_letter(&self, event: &Event) -> Result<()> {
        self.ensure_available()?;
        self.dead_letters.lock().await.push(event.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}
