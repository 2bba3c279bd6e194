use std::future::Future;

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{error::PipelineError, models::retry::RetryConfig};

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);

                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(
                    delay_ms.saturating_mul(config.backoff_multiplier),
                    config.max_delay_ms,
                );
            }
        }
    }
}

/// Startup connection loop for a backing service. Exhausting the attempts is
/// a process-level failure.
pub async fn connect_with_retry<F, Fut, T>(
    service: &'static str,
    config: &RetryConfig,
    connect: F,
) -> Result<T, PipelineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    info!(service, max_attempts = config.max_attempts, "Connecting");

    retry_with_backoff(config, || {
        let attempt = connect();
        async move {
            attempt.await.map_err(|e| {
                warn!(service, error = %e, "Connection attempt failed");
                e
            })
        }
    })
    .await
    .map_err(|e| PipelineError::Connectivity {
        service,
        attempts: config.max_attempts,
        cause: e.to_string(),
    })
}
