use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{EventPublisher, Ledger},
    models::health::{HealthCheckResponse, HealthStatus, ServiceHealth},
};

const SLOW_RESPONSE_MS: u64 = 1_000;

pub struct HealthChecker {
    ledger: Arc<dyn Ledger>,
    publisher: Arc<dyn EventPublisher>,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn Ledger>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { ledger, publisher }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        let db_health = self.check_database().await;
        checks.insert("database".to_string(), db_health);

        let broker_health = self.check_broker().await;
        checks.insert("message_broker".to_string(), broker_health);

        let overall_status = determine_overall_status(&checks);

        HealthCheckResponse {
            status: overall_status,
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_database(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.ledger.health_check().await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Database health check passed");
                timed(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }

    async fn check_broker(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.publisher.health_check().await {
            Ok(_) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Broker health check passed");
                timed(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                ServiceHealth::unhealthy(format!("Connection failed: {}", e))
            }
        }
    }
}

fn timed(elapsed_ms: u64) -> ServiceHealth {
    if elapsed_ms > SLOW_RESPONSE_MS {
        ServiceHealth::degraded(elapsed_ms, "Slow response".to_string())
    } else {
        ServiceHealth::healthy(elapsed_ms)
    }
}

fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let has_unhealthy = checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded);

    if has_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
