use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{clients::DeliveryTransport, models::notification::NotificationPayload};

const FAILURE_MARKER: &str = "fail";

/// Stand-in for an external provider. Each send waits for the configured
/// latency; recipients containing "fail" always fail, which is how retry and
/// dead-lettering are exercised end to end.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    latency: Duration,
}

impl SimulatedTransport {
    pub fn new(latency_ms: u64) -> Self {
        info!(latency_ms, "Simulated delivery transport initialized");

        Self {
            latency: Duration::from_millis(latency_ms),
        }
    }
}

#[async_trait]
impl DeliveryTransport for SimulatedTransport {
    async fn send(&self, notification: &NotificationPayload) -> Result<()> {
        sleep(self.latency).await;

        debug!(
            notification_id = %notification.notification_id,
            recipient = %notification.recipient,
            "Sending notification"
        );

        if notification.recipient.contains(FAILURE_MARKER) {
            warn!(
                notification_id = %notification.notification_id,
                "Simulated delivery failure"
            );
            return Err(anyhow!(
                "Simulated External Service Failure (Network Timeout)"
            ));
        }

        info!(notification_id = %notification.notification_id, "Notification delivered");

        Ok(())
    }
}
