use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::status::DeliveryStatus;

/// One row of the `notifications` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub notification_id: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub last_attempt_timestamp: Option<DateTime<Utc>>,
}
