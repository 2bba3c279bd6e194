//! Process roles: the ingestion API and the consumer worker.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::{error, info};

use crate::{
    api::{AppState, run_api_server},
    clients::{
        database::PostgresLedger, health::HealthChecker, rbmq::RabbitMqClient,
        transport::SimulatedTransport,
    },
    config::{Config, ServiceRole},
    consumer::{EventProcessor, run_consumer},
    producer::Producer,
    utils::connect_with_retry,
};

const CONSUMER_TAG: &str = "notification_worker";

pub async fn run(config: Config) -> Result<()> {
    info!(role = ?config.service_role, "Starting notification pipeline");

    match config.service_role {
        ServiceRole::Api => run_api_service(config).await,
        ServiceRole::Consumer => run_consumer_service(config).await,
        ServiceRole::All => {
            tokio::try_join!(
                run_api_service(config.clone()),
                run_consumer_service(config)
            )?;
            Ok(())
        }
    }
}

pub async fn run_api_service(config: Config) -> Result<()> {
    let topology = config.topology()?;
    let retry_config = config.startup_retry_config();

    let broker = Arc::new(
        connect_with_retry("rabbitmq", &retry_config, || {
            RabbitMqClient::connect(&config.rabbitmq_url, topology.clone())
        })
        .await?,
    );
    broker.declare_topology().await?;

    let ledger = Arc::new(
        connect_with_retry("postgres", &retry_config, || {
            PostgresLedger::connect(&config.database_url, config.database_max_connections)
        })
        .await?,
    );

    let state = Arc::new(AppState {
        producer: Producer::new(broker.clone()),
        ledger: ledger.clone(),
        health_checker: HealthChecker::new(ledger.clone(), broker.clone()),
        api_key: config.api_key.clone(),
    });

    let served = run_api_server(config.server_port, state, shutdown_signal())
        .await
        .map_err(|e| anyhow!("Ingestion API failed: {}", e));

    if let Err(e) = broker.close().await {
        error!(error = %e, "Failed to close broker connection");
    }
    ledger.close().await;

    served
}

pub async fn run_consumer_service(config: Config) -> Result<()> {
    let topology = config.topology()?;
    let retry_config = config.startup_retry_config();

    let ledger = Arc::new(
        connect_with_retry("postgres", &retry_config, || {
            PostgresLedger::connect(&config.database_url, config.database_max_connections)
        })
        .await?,
    );
    ledger.migrate().await?;

    let broker = Arc::new(
        connect_with_retry("rabbitmq", &retry_config, || {
            RabbitMqClient::connect(&config.rabbitmq_url, topology.clone())
        })
        .await?,
    );
    broker.declare_topology().await?;

    let processor = Arc::new(EventProcessor::new(
        ledger.clone(),
        broker.clone(),
        Arc::new(SimulatedTransport::new(config.delivery_latency_ms)),
        topology,
        config.max_retries,
    ));

    let consumer = broker
        .create_consumer(config.prefetch_count, CONSUMER_TAG)
        .await?;

    info!(max_retries = config.max_retries, "Consumer waiting for messages");

    let consumed = run_consumer(processor, consumer, {
        let broker = broker.clone();
        async move {
            shutdown_signal().await;
            if let Err(e) = broker.cancel_consumer(CONSUMER_TAG).await {
                error!(error = %e, "Failed to cancel consumer");
            }
        }
    })
    .await;

    if let Err(e) = broker.close().await {
        error!(error = %e, "Failed to close broker connection");
    }
    ledger.close().await;

    consumed
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
