use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Recipient data carried by every event. Fields beyond the ones the
/// pipeline reads are kept verbatim so a dead-lettered event is published
/// exactly as it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub email: String,
    pub username: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A validated event as handed over by the ingestion layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub event_type: String,
    pub timestamp: String,
    pub payload: EventPayload,
}

/// The unit of work travelling through the queues.
///
/// `id` is assigned once at ingestion and survives every redelivery.
/// `retry_count` is only ever changed by the consumer when it schedules a
/// retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "QueuedEvent")]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub timestamp: String,
    pub payload: EventPayload,

    #[serde(default)]
    pub retry_count: u32,
}

/// Accepted shape of a queued message. Older producers name the identity
/// `eventId`; `id` wins when both are present.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueuedEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    event_type: String,
    timestamp: String,
    payload: EventPayload,
    #[serde(default)]
    retry_count: u32,
}

impl TryFrom<QueuedEvent> for Event {
    type Error = String;

    fn try_from(queued: QueuedEvent) -> Result<Self, String> {
        let id = [queued.id, queued.event_id]
            .into_iter()
            .flatten()
            .find(|id| !id.trim().is_empty())
            .ok_or_else(|| "event id is missing".to_string())?;

        Ok(Self {
            id,
            event_type: queued.event_type,
            timestamp: queued.timestamp,
            payload: queued.payload,
            retry_count: queued.retry_count,
        })
    }
}

impl Event {
    pub fn from_request(request: IngestRequest) -> Self {
        let id = request
            .event_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            id,
            event_type: request.event_type,
            timestamp: request.timestamp,
            payload: request.payload,
            retry_count: 0,
        }
    }

    /// Decodes a queued message. An event without a usable identity is as
    /// malformed as one that does not parse.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn notification_id(&self) -> String {
        format!("notif-{}", self.id)
    }
}
