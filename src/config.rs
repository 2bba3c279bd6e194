use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    error::PipelineError,
    models::retry::RetryConfig,
    topology::{
        DEFAULT_DEAD_LETTER_QUEUE, DEFAULT_DELAY_TIERS_MS, DEFAULT_MAIN_QUEUE,
        DEFAULT_RETRY_EXCHANGE, Topology,
    },
};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Api,
    Consumer,
    All,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_main_queue")]
    pub main_queue_name: String,
    #[serde(default = "default_retry_exchange")]
    pub retry_exchange_name: String,
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue_name: String,
    #[serde(default = "default_delay_tiers")]
    pub delay_tiers_ms: Vec<u64>,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub database_url: String,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delivery_latency_ms")]
    pub delivery_latency_ms: u64,

    #[serde(default = "default_startup_max_attempts")]
    pub startup_max_attempts: u32,
    #[serde(default = "default_startup_retry_delay_ms")]
    pub startup_retry_delay_ms: u64,
    #[serde(default = "default_startup_max_retry_delay_ms")]
    pub startup_max_retry_delay_ms: u64,
    #[serde(default = "default_startup_backoff_multiplier")]
    pub startup_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_service_role")]
    pub service_role: ServiceRole,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.prefetch_count == 0 {
            return Err(PipelineError::Configuration(
                "PREFETCH_COUNT must be at least 1".to_string(),
            ));
        }

        if self.startup_max_attempts == 0 {
            return Err(PipelineError::Configuration(
                "STARTUP_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.startup_backoff_multiplier == 0 {
            return Err(PipelineError::Configuration(
                "STARTUP_BACKOFF_MULTIPLIER must be at least 1".to_string(),
            ));
        }

        self.topology()?;

        Ok(())
    }

    pub fn topology(&self) -> Result<Topology, PipelineError> {
        Topology::new(
            self.main_queue_name.clone(),
            self.retry_exchange_name.clone(),
            self.dead_letter_queue_name.clone(),
            &self.delay_tiers_ms,
        )
    }

    pub fn startup_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.startup_max_attempts,
            initial_delay_ms: self.startup_retry_delay_ms,
            max_delay_ms: self.startup_max_retry_delay_ms,
            backoff_multiplier: self.startup_backoff_multiplier,
        }
    }
}

fn default_main_queue() -> String {
    DEFAULT_MAIN_QUEUE.to_string()
}

fn default_retry_exchange() -> String {
    DEFAULT_RETRY_EXCHANGE.to_string()
}

fn default_dead_letter_queue() -> String {
    DEFAULT_DEAD_LETTER_QUEUE.to_string()
}

fn default_delay_tiers() -> Vec<u64> {
    DEFAULT_DELAY_TIERS_MS.to_vec()
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_delivery_latency_ms() -> u64 {
    100
}

fn default_startup_max_attempts() -> u32 {
    10
}

fn default_startup_retry_delay_ms() -> u64 {
    5_000
}

fn default_startup_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_startup_backoff_multiplier() -> u64 {
    1
}

fn default_server_port() -> u16 {
    3000
}

fn default_service_role() -> ServiceRole {
    ServiceRole::All
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}
