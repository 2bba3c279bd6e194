use std::sync::Arc;

use anyhow::Result;
use notification_pipeline::{
    clients::{
        Ledger,
        memory::{MemoryBroker, MemoryLedger},
        transport::SimulatedTransport,
    },
    consumer::{EventProcessor, Outcome},
    models::{event::IngestRequest, status::DeliveryStatus},
    producer::Producer,
    topology::Topology,
};
use tokio::time::{Duration, Instant, timeout};

const IDLE: Duration = Duration::from_secs(120);

struct Pipeline {
    ledger: Arc<MemoryLedger>,
    broker: Arc<MemoryBroker>,
    producer: Producer,
    processor: Arc<EventProcessor>,
}

impl Pipeline {
    fn new(max_retries: u32) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let broker = Arc::new(MemoryBroker::new(Topology::default()));
        let processor = Arc::new(EventProcessor::new(
            ledger.clone(),
            broker.clone(),
            Arc::new(SimulatedTransport::new(100)),
            Topology::default(),
            max_retries,
        ));

        Self {
            producer: Producer::new(broker.clone()),
            ledger,
            broker,
            processor,
        }
    }
}

/// Consumes until the main queue stays empty for `IDLE`, acknowledging
/// outcomes and requeueing bookkeeping failures.
async fn drain(broker: Arc<MemoryBroker>, processor: Arc<EventProcessor>) -> Vec<Outcome> {
    let mut outcomes = Vec::new();

    while let Ok(Some(data)) = timeout(IDLE, broker.recv()).await {
        match processor.handle(&data).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(_) => broker.requeue(data).expect("main queue open"),
        }
    }

    outcomes
}

fn ingest_request(email: &str, event_id: Option<&str>) -> IngestRequest {
    serde_json::from_value(serde_json::json!({
        "eventId": event_id,
        "eventType": "user_signup",
        "timestamp": "2024-01-01T00:00:00Z",
        "payload": { "userId": "user-e2e-001", "email": email, "username": "E2E_Tester" }
    }))
    .unwrap()
}

/// Test: Successful delivery goes QUEUED -> SENT in one attempt
#[tokio::test(start_paused = true)]
async fn test_end_to_end_success_flow() -> Result<()> {
    let pipeline = Pipeline::new(3);

    let event = pipeline
        .producer
        .ingest(ingest_request("e2e-user@example.com", None))
        .await?;

    let outcomes = drain(pipeline.broker.clone(), pipeline.processor.clone()).await;
    assert_eq!(outcomes, vec![Outcome::Sent]);

    let record = pipeline.ledger.find(&event.id).await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 1);
    assert!(pipeline.broker.dead_letters().await.is_empty());

    Ok(())
}

/// Test: Permanent failure walks every tier, then lands in the DLQ
#[tokio::test(start_paused = true)]
async fn test_end_to_end_retry_exhaustion() -> Result<()> {
    let pipeline = Pipeline::new(3);
    let start = Instant::now();

    let event = pipeline
        .producer
        .ingest(ingest_request("fail@example.com", None))
        .await?;

    let outcomes = drain(pipeline.broker.clone(), pipeline.processor.clone()).await;

    assert_eq!(
        outcomes,
        vec![
            Outcome::RetryScheduled { retry_count: 1, tier_ms: 1_000 },
            Outcome::RetryScheduled { retry_count: 2, tier_ms: 5_000 },
            Outcome::RetryScheduled { retry_count: 3, tier_ms: 30_000 },
            Outcome::DeadLettered,
        ]
    );

    let dead_letters = pipeline.broker.dead_letters().await;
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].id, event.id);
    assert_eq!(dead_letters[0].retry_count, 3);

    let record = pipeline.ledger.find(&event.id).await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::FailedDlq);
    assert_eq!(record.attempt_count, 4);

    // The event spent at least the sum of the three tier delays in flight.
    assert!(start.elapsed() >= Duration::from_millis(36_000));

    Ok(())
}

/// Test: Identical ingestions racing through two workers
#[tokio::test(start_paused = true)]
async fn test_end_to_end_duplicate_ingestion_race() -> Result<()> {
    let pipeline = Pipeline::new(3);

    let (first, second) = tokio::join!(
        pipeline.producer.ingest(ingest_request("race@example.com", Some("order-7"))),
        pipeline.producer.ingest(ingest_request("race@example.com", Some("order-7"))),
    );
    assert_eq!(first?.id, "order-7");
    assert_eq!(second?.id, "order-7");

    let worker_a = tokio::spawn(drain(pipeline.broker.clone(), pipeline.processor.clone()));
    let worker_b = tokio::spawn(drain(pipeline.broker.clone(), pipeline.processor.clone()));
    let (a, b) = tokio::join!(worker_a, worker_b);

    let outcomes: Vec<Outcome> = a?.into_iter().chain(b?).collect();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.contains(&Outcome::Sent));
    assert!(outcomes.iter().all(|o| matches!(o, Outcome::Sent | Outcome::Skipped)));

    assert_eq!(pipeline.ledger.len().await, 1);
    let record = pipeline.ledger.find("order-7").await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert!(pipeline.broker.dead_letters().await.is_empty());

    Ok(())
}

/// Test: Poison messages are dropped without touching the ledger
#[tokio::test(start_paused = true)]
async fn test_end_to_end_malformed_message_dropped() -> Result<()> {
    let pipeline = Pipeline::new(3);

    pipeline.broker.publish_raw(b"{\"eventType\": 42".to_vec())?;

    let outcomes = drain(pipeline.broker.clone(), pipeline.processor.clone()).await;
    assert_eq!(outcomes, vec![Outcome::Dropped]);
    assert!(pipeline.ledger.is_empty().await);
    assert!(pipeline.broker.dead_letters().await.is_empty());

    Ok(())
}

/// Test: A message requeued during a storage outage is delivered afterwards
#[tokio::test(start_paused = true)]
async fn test_end_to_end_storage_outage_redelivers() -> Result<()> {
    let pipeline = Pipeline::new(3);

    let event = pipeline
        .producer
        .ingest(ingest_request("user@example.com", None))
        .await?;

    pipeline.ledger.set_unavailable(true);
    let data = pipeline.broker.recv().await.expect("queued message");
    assert!(pipeline.processor.handle(&data).await.is_err());
    pipeline.broker.requeue(data)?;
    pipeline.ledger.set_unavailable(false);

    let outcomes = drain(pipeline.broker.clone(), pipeline.processor.clone()).await;
    assert_eq!(outcomes, vec![Outcome::Sent]);

    let record = pipeline.ledger.find(&event.id).await?.expect("record exists");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.attempt_count, 1);

    Ok(())
}
