use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info};

use crate::{
    clients::EventPublisher, error::PipelineError, models::event::Event, topology::Topology,
};

const PERSISTENT: u8 = 2;

/// One connection and one channel, owned by a single process role.
///
/// `lapin` serialises frames on a channel internally, so the per-message
/// tasks spawned by the consumer may publish through the same client.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    topology: Topology,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str, topology: Topology) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        info!("RabbitMQ connection established");

        Ok(Self {
            connection,
            channel,
            topology,
        })
    }

    /// Declares every queue, exchange and binding. Re-declaring with the same
    /// arguments is a no-op on the broker; a declaration whose arguments
    /// differ from an existing entity fails and is returned as a topology
    /// error.
    pub async fn declare_topology(&self) -> Result<(), PipelineError> {
        let topology = &self.topology;

        self.declare_queue(&topology.main_queue, FieldTable::default())
            .await?;
        self.declare_queue(&topology.dead_letter_queue, FieldTable::default())
            .await?;

        self.channel
            .exchange_declare(
                &topology.retry_exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                PipelineError::Topology(format!(
                    "exchange '{}': {}",
                    topology.retry_exchange, e
                ))
            })?;

        for tier in topology.tiers() {
            let mut arguments = FieldTable::default();
            arguments.insert("x-dead-letter-exchange".into(), AMQPValue::LongString("".into()));
            arguments.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(topology.main_queue.as_str().into()),
            );
            arguments.insert("x-message-ttl".into(), AMQPValue::LongUInt(tier.ttl_ms as u32));

            self.declare_queue(&tier.queue_name, arguments).await?;

            self.channel
                .queue_bind(
                    &tier.queue_name,
                    &topology.retry_exchange,
                    &tier.routing_key(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    PipelineError::Topology(format!("binding '{}': {}", tier.queue_name, e))
                })?;

            debug!(queue = %tier.queue_name, ttl_ms = tier.ttl_ms, "Delay tier declared");
        }

        info!(
            main_queue = %topology.main_queue,
            dead_letter_queue = %topology.dead_letter_queue,
            tiers = topology.tiers().len(),
            "Delivery topology declared"
        );

        Ok(())
    }

    async fn declare_queue(&self, name: &str, arguments: FieldTable) -> Result<(), PipelineError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| PipelineError::Topology(format!("queue '{}': {}", name, e)))?;

        Ok(())
    }

    pub async fn create_consumer(&self, prefetch_count: u16, tag: &str) -> Result<Consumer, Error> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        let consumer = self
            .channel
            .basic_consume(
                &self.topology.main_queue,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.topology.main_queue, prefetch_count, "Consumer created");

        Ok(consumer)
    }

    /// Stops deliveries to `tag`. Unacknowledged messages stay with the
    /// consumer until acked or the channel closes.
    pub async fn cancel_consumer(&self, tag: &str) -> Result<(), Error> {
        self.channel
            .basic_cancel(tag, BasicCancelOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to cancel consumer: {}", e))?;

        Ok(())
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.channel
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ channel: {}", e))?;

        self.connection
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| anyhow!("Failed to close RabbitMQ connection: {}", e))?;

        info!("RabbitMQ connection closed");

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, event: &Event) -> Result<(), Error> {
        let payload = serde_json::to_vec(event)?;

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish to '{}': {}", routing_key, e))?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RabbitMqClient {
    async fn publish_event(&self, event: &Event) -> Result<()> {
        self.publish("", &self.topology.main_queue, event).await?;
        debug!(event_id = %event.id, "Event published to main queue");
        Ok(())
    }

    async fn publish_retry(&self, event: &Event, delay_ms: u64) -> Result<u64> {
        let tier = self.topology.select_tier(delay_ms);

        self.publish(&self.topology.retry_exchange, &tier.routing_key(), event)
            .await?;

        debug!(
            event_id = %event.id,
            retry_count = event.retry_count,
            tier_ms = tier.ttl_ms,
            "Event published to retry exchange"
        );

        Ok(tier.ttl_ms)
    }

    async fn publish_dead_letter(&self, event: &Event) -> Result<()> {
        self.publish("", &self.topology.dead_letter_queue, event)
            .await?;
        debug!(event_id = %event.id, "Event published to dead letter queue");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.connection.status().connected() && self.channel.status().connected() {
            Ok(())
        } else {
            Err(anyhow!("RabbitMQ connection is not open"))
        }
    }
}
