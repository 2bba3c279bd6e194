use thiserror::Error;

/// Failures that stop the process. `main` returns them so the exit status is
/// non-zero and an orchestrator can restart the service.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("topology declaration failed: {0}")]
    Topology(String),

    #[error("could not reach {service} after {attempts} attempts: {cause}")]
    Connectivity {
        service: &'static str,
        attempts: u32,
        cause: String,
    },
}

/// A per-message failure that must not be acknowledged.
///
/// The broker redelivers the message later; the event's retry budget is not
/// touched.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("bookkeeping failed for event {event_id}: {cause}")]
    Bookkeeping {
        event_id: String,
        cause: anyhow::Error,
    },
}

impl ProcessingError {
    pub fn bookkeeping(event_id: &str, cause: anyhow::Error) -> Self {
        ProcessingError::Bookkeeping {
            event_id: event_id.to_string(),
            cause,
        }
    }
}
