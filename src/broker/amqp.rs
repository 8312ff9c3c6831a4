//! AMQP (RabbitMQ) broker client.
//!
//! Thin adapter from the broker contract onto lapin. Exchanges are direct
//! exchanges; direct sends go through the default exchange.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, info, warn};

use super::{
    BrokerChannel, BrokerError, BrokerConnection, BrokerConnector, ConsumeOptions, DeclareOptions, Delivery,
    DeliveryAcker, DeliveryHandler, Result,
};
use crate::config::AmqpConfig;

/// Default exchange; publishing to it with a queue name as routing key sends to that queue.
const DEFAULT_EXCHANGE: &str = "";

/// Content type stamped on every message.
const CONTENT_TYPE: &str = "application/json";

/// Connects to RabbitMQ.
#[derive(Clone, Debug)]
pub struct AmqpConnector {
    config: AmqpConfig,
}

impl AmqpConnector {
    pub fn new(config: AmqpConfig) -> Self {
        Self { config }
    }

    fn properties(&self) -> ConnectionProperties {
        let properties = ConnectionProperties::default();
        match &self.config.connection_name {
            Some(name) => properties.with_connection_name(name.clone().into()),
            None => properties,
        }
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>> {
        let connection = Connection::connect(&self.config.url, self.properties()).await?;
        info!(url = %self.config.url, "Connected to AMQP");
        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        debug!(channel_id = channel.id(), "Opened AMQP channel");
        Ok(Arc::new(AmqpChannel { channel }))
    }
}

struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    async fn basic_publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let properties = BasicProperties::default().with_content_type(CONTENT_TYPE.into());

        // Publisher confirms are not enabled; the returned confirm resolves immediately.
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn assert_exchange(&self, name: &str, options: DeclareOptions) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    auto_delete: options.auto_delete,
                    durable: options.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn assert_queue(&self, name: &str, options: DeclareOptions) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    auto_delete: options.auto_delete,
                    durable: options.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, topic: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                topic,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn publish(&self, exchange: &str, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.basic_publish(exchange, topic, &payload).await
    }

    async fn send_to_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.basic_publish(DEFAULT_EXCHANGE, queue, &payload).await
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<()> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: options.no_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let deliveries = consumer.map(|delivery| {
            delivery.map_err(BrokerError::from).map(|delivery| Delivery {
                exchange: delivery.exchange.as_str().to_string(),
                routing_key: delivery.routing_key.as_str().to_string(),
                data: delivery.data,
                acker: Arc::new(AmqpAcker {
                    acker: delivery.acker,
                }) as Arc<dyn DeliveryAcker>,
            })
        });
        tokio::spawn(drive_consumer(queue.to_string(), deliveries, handler));

        Ok(())
    }
}

/// Why a consumer loop returned.
#[derive(Debug)]
enum ConsumerExit {
    Ended,
    Failed(BrokerError),
}

/// Hand deliveries to `handler` one at a time until the stream ends or fails.
///
/// Nothing restarts a stopped consumer, so stopping is always logged at warn.
async fn drive_consumer<S>(
    queue: String,
    deliveries: S,
    handler: Arc<dyn DeliveryHandler>,
) -> ConsumerExit
where
    S: Stream<Item = Result<Delivery>>,
{
    let mut deliveries = Box::pin(deliveries);
    let exit = loop {
        match deliveries.next().await {
            Some(Ok(delivery)) => handler.handle(delivery).await,
            Some(Err(e)) => break ConsumerExit::Failed(e),
            None => break ConsumerExit::Ended,
        }
    };

    match &exit {
        ConsumerExit::Failed(e) => warn!(
            queue = %queue,
            error = %e,
            "Consumer failed; queue is no longer being consumed"
        ),
        ConsumerExit::Ended => warn!(
            queue = %queue,
            "Consumer stream ended; queue is no longer being consumed"
        ),
    }
    exit
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.acker.reject(BasicRejectOptions { requeue }).await?;
        Ok(())
    }
}
