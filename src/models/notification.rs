use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::models::event::Event;

/// What the delivery transport receives for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub notification_id: String,
    pub event_id: String,
    pub recipient: String,
    pub message: String,
    pub timestamp: String,
}

impl NotificationPayload {
    pub fn from_event(event: &Event) -> Self {
        Self {
            notification_id: event.notification_id(),
            event_id: event.id.clone(),
            recipient: event.payload.email.clone(),
            message: format!(
                "Hello {}, welcome! (Type: {})",
                event.payload.username, event.event_type
            ),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}
