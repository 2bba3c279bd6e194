use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use notification_pipeline::{
    clients::{
        DeliveryTransport, Ledger,
        memory::{MemoryBroker, MemoryLedger},
    },
    consumer::{EventProcessor, Outcome},
    models::{event::Event, notification::NotificationPayload, status::DeliveryStatus},
    topology::Topology,
};

/// Counts sends; recipients containing "fail" are rejected.
#[derive(Default)]
struct CountingTransport {
    sends: AtomicUsize,
}

#[async_trait]
impl DeliveryTransport for CountingTransport {
    async fn send(&self, notification: &NotificationPayload) -> Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if notification.recipient.contains("fail") {
            anyhow::bail!("provider rejected the request");
        }
        Ok(())
    }
}

fn event(id: &str, email: &str, retry_count: u32) -> Event {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "eventType": "user_signup",
        "timestamp": "2024-01-01T00:00:00Z",
        "payload": { "userId": "u-1", "email": email, "username": "john_doe" },
        "retryCount": retry_count
    }))
    .unwrap()
}

fn setup(max_retries: u32) -> (Arc<MemoryLedger>, Arc<CountingTransport>, EventProcessor) {
    let ledger = Arc::new(MemoryLedger::new());
    let transport = Arc::new(CountingTransport::default());
    let processor = EventProcessor::new(
        ledger.clone(),
        Arc::new(MemoryBroker::new(Topology::default())),
        transport.clone(),
        Topology::default(),
        max_retries,
    );
    (ledger, transport, processor)
}

/// Test: Duplicate creation keeps the first record
#[tokio::test]
async fn test_create_if_absent_is_silent_on_duplicates() -> Result<()> {
    let ledger = MemoryLedger::new();
    let first = event("evt-dup", "user@example.com", 0);

    ledger.create_if_absent(&first).await?;
    ledger.update_status("evt-dup", DeliveryStatus::FailedRetrying).await?;
    ledger.create_if_absent(&first).await?;

    let record = ledger.find("evt-dup").await?.expect("record exists");
    assert_eq!(ledger.len().await, 1);
    assert_eq!(record.status, DeliveryStatus::FailedRetrying);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.notification_id, "notif-evt-dup");

    Ok(())
}

/// Test: Only terminal statuses count as handled
#[tokio::test]
async fn test_only_terminal_statuses_are_handled() -> Result<()> {
    let ledger = MemoryLedger::new();
    ledger.create_if_absent(&event("evt-state", "user@example.com", 0)).await?;

    assert!(!ledger.is_handled("evt-state").await?);
    assert!(!ledger.is_handled("evt-unknown").await?);

    ledger.update_status("evt-state", DeliveryStatus::FailedRetrying).await?;
    assert!(!ledger.is_handled("evt-state").await?);

    ledger.update_status("evt-state", DeliveryStatus::FailedDlq).await?;
    assert!(ledger.is_handled("evt-state").await?);

    Ok(())
}

/// Test: Repeated status updates each stamp an attempt
#[tokio::test]
async fn test_update_status_counts_every_call() -> Result<()> {
    let ledger = MemoryLedger::new();
    ledger.create_if_absent(&event("evt-count", "user@example.com", 0)).await?;

    ledger.update_status("evt-count", DeliveryStatus::Sent).await?;
    ledger.update_status("evt-count", DeliveryStatus::Sent).await?;

    let record = ledger.find("evt-count").await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 2);
    assert!(record.last_attempt_timestamp.is_some());

    Ok(())
}

/// Test: Redelivery after SENT triggers no second send and no second create
#[tokio::test]
async fn test_redelivery_after_sent_is_skipped() -> Result<()> {
    let (ledger, transport, processor) = setup(3);
    let data = serde_json::to_vec(&event("evt-sent", "user@example.com", 0))?;

    assert_eq!(processor.handle(&data).await?, Outcome::Sent);
    assert_eq!(processor.handle(&data).await?, Outcome::Skipped);
    assert_eq!(processor.handle(&data).await?, Outcome::Skipped);

    assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.create_calls(), 1);

    Ok(())
}

/// Test: Dead-lettered events stay dead even when resubmitted
#[tokio::test]
async fn test_redelivery_after_dead_letter_is_skipped() -> Result<()> {
    let (ledger, transport, processor) = setup(0);
    let data = serde_json::to_vec(&event("evt-dlq", "fail@example.com", 0))?;

    assert_eq!(processor.handle(&data).await?, Outcome::DeadLettered);

    let resubmitted = serde_json::to_vec(&event("evt-dlq", "user@example.com", 0))?;
    assert_eq!(processor.handle(&resubmitted).await?, Outcome::Skipped);

    assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.create_calls(), 1);
    let record = ledger.find("evt-dlq").await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::FailedDlq);

    Ok(())
}

/// Test: An event still retrying is processed again on redelivery
#[tokio::test]
async fn test_retrying_event_is_processed_again() -> Result<()> {
    let (ledger, transport, processor) = setup(3);

    let first = serde_json::to_vec(&event("evt-flaky", "fail@example.com", 0))?;
    assert!(matches!(
        processor.handle(&first).await?,
        Outcome::RetryScheduled { retry_count: 1, .. }
    ));

    let recovered = serde_json::to_vec(&event("evt-flaky", "user@example.com", 1))?;
    assert_eq!(processor.handle(&recovered).await?, Outcome::Sent);

    assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    let record = ledger.find("evt-flaky").await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 2);

    Ok(())
}

/// Test: A storage outage leaves no trace and the message can be replayed
#[tokio::test]
async fn test_storage_outage_then_recovery() -> Result<()> {
    let (ledger, transport, processor) = setup(3);
    let data = serde_json::to_vec(&event("evt-outage", "user@example.com", 0))?;

    ledger.set_unavailable(true);
    assert!(processor.handle(&data).await.is_err());
    assert_eq!(transport.sends.load(Ordering::SeqCst), 0);

    ledger.set_unavailable(false);
    assert_eq!(processor.handle(&data).await?, Outcome::Sent);
    assert_eq!(transport.sends.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Concurrent handlers of one identity end with a single row
#[tokio::test]
async fn test_concurrent_processing_of_same_event() -> Result<()> {
    let (ledger, transport, processor) = setup(3);
    let processor = Arc::new(processor);
    let data = serde_json::to_vec(&event("evt-race", "user@example.com", 0))?;

    let mut handles = vec![];
    for _ in 0..10 {
        let processor = Arc::clone(&processor);
        let data = data.clone();
        handles.push(tokio::spawn(async move { processor.handle(&data).await }));
    }

    let outcomes: Vec<Outcome> = futures_util::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task completed").expect("handled"))
        .collect();

    assert!(outcomes.iter().all(|o| matches!(o, Outcome::Sent | Outcome::Skipped)));
    assert!(outcomes.contains(&Outcome::Sent));
    assert_eq!(ledger.len().await, 1);

    let sends = transport.sends.load(Ordering::SeqCst);
    let sent = outcomes.iter().filter(|o| **o == Outcome::Sent).count();
    assert_eq!(sends, sent);

    let record = ledger.find("evt-race").await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::Sent);

    Ok(())
}
