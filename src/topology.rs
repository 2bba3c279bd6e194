use crate::error::PipelineError;

pub const DEFAULT_MAIN_QUEUE: &str = "notification_events";
pub const DEFAULT_RETRY_EXCHANGE: &str = "retry_exchange";
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "notification_dead_letter_queue";
pub const DEFAULT_DELAY_TIERS_MS: [u64; 3] = [1_000, 5_000, 30_000];

/// A delay queue: messages sit here for `ttl_ms`, then the broker forwards
/// them back to the main queue. Nothing ever consumes a tier directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayTier {
    pub ttl_ms: u64,
    pub queue_name: String,
}

impl DelayTier {
    fn new(ttl_ms: u64) -> Self {
        let queue_name = if ttl_ms % 1_000 == 0 {
            format!("delay_queue_{}s", ttl_ms / 1_000)
        } else {
            format!("delay_queue_{}ms", ttl_ms)
        };

        Self { ttl_ms, queue_name }
    }

    pub fn routing_key(&self) -> String {
        format!("retry.{}", self.ttl_ms)
    }
}

/// Names and tiers of the durable queue graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub main_queue: String,
    pub retry_exchange: String,
    pub dead_letter_queue: String,
    tiers: Vec<DelayTier>,
}

impl Topology {
    /// Tiers are sorted ascending and de-duplicated. An empty tier set or a
    /// zero TTL is a configuration error.
    pub fn new(
        main_queue: impl Into<String>,
        retry_exchange: impl Into<String>,
        dead_letter_queue: impl Into<String>,
        tiers_ms: &[u64],
    ) -> Result<Self, PipelineError> {
        let mut ttls = tiers_ms.to_vec();
        ttls.sort_unstable();
        ttls.dedup();

        if ttls.is_empty() {
            return Err(PipelineError::Topology(
                "at least one delay tier is required".to_string(),
            ));
        }

        if ttls[0] == 0 {
            return Err(PipelineError::Topology(
                "delay tier TTL must be greater than zero".to_string(),
            ));
        }

        if ttls.iter().any(|ttl| *ttl > u64::from(u32::MAX)) {
            return Err(PipelineError::Topology(
                "delay tier TTL does not fit the broker's TTL argument".to_string(),
            ));
        }

        let topology = Self {
            main_queue: main_queue.into(),
            retry_exchange: retry_exchange.into(),
            dead_letter_queue: dead_letter_queue.into(),
            tiers: ttls.into_iter().map(DelayTier::new).collect(),
        };

        let names = [
            &topology.main_queue,
            &topology.retry_exchange,
            &topology.dead_letter_queue,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(PipelineError::Topology(
                "queue and exchange names cannot be empty".to_string(),
            ));
        }

        Ok(topology)
    }

    pub fn tiers(&self) -> &[DelayTier] {
        &self.tiers
    }

    /// Smallest tier whose TTL covers `delay_ms`; the longest tier when none
    /// does.
    pub fn select_tier(&self, delay_ms: u64) -> &DelayTier {
        self.tiers
            .iter()
            .find(|tier| tier.ttl_ms >= delay_ms)
            .unwrap_or_else(|| self.longest_tier())
    }

    /// Delay before retry number `retry_count` (1-based): the n-th tier,
    /// holding at the longest one after that.
    pub fn retry_delay_ms(&self, retry_count: u32) -> u64 {
        let index = (retry_count.saturating_sub(1) as usize).min(self.tiers.len() - 1);
        self.tiers[index].ttl_ms
    }

    fn longest_tier(&self) -> &DelayTier {
        &self.tiers[self.tiers.len() - 1]
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            main_queue: DEFAULT_MAIN_QUEUE.to_string(),
            retry_exchange: DEFAULT_RETRY_EXCHANGE.to_string(),
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
            tiers: DEFAULT_DELAY_TIERS_MS.into_iter().map(DelayTier::new).collect(),
        }
    }
}
