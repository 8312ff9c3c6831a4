//! Broker client contract.
//!
//! This module contains:
//! - `BrokerConnector` / `BrokerConnection` / `BrokerChannel`: the transport operations
//!   the stream core drives (connect, create channel, assert, bind, publish, consume)
//! - `DeliveryHandler` / `DeliveryAcker`: the consumer side of a channel
//! - Implementations: AMQP (RabbitMQ via lapin), Mock

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

// Implementation modules
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod mock;

// Re-exports
#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
pub use mock::MockBroker;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker-native errors. The stream core propagates these without inspecting them.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[cfg(feature = "amqp")]
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Broker error: {0}")]
    Backend(String),
}

/// Declaration flags for exchanges and queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeclareOptions {
    pub auto_delete: bool,
    pub durable: bool,
}

/// Every exchange and queue is declared auto-delete and durable.
pub const RESOURCE_POLICY: DeclareOptions = DeclareOptions {
    auto_delete: true,
    durable: true,
};

/// Consumer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeOptions {
    /// Broker treats a message as consumed as soon as it is delivered.
    pub no_ack: bool,
}

impl ConsumeOptions {
    pub fn auto_ack() -> Self {
        Self { no_ack: true }
    }

    pub fn manual_ack() -> Self {
        Self { no_ack: false }
    }
}

/// Settles a single delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    /// Mark the delivery as successfully processed.
    async fn ack(&self) -> Result<()>;

    /// Refuse the delivery, optionally returning it to the queue.
    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// A message taken off a queue.
pub struct Delivery {
    /// Exchange the message was published to (empty for direct sends).
    pub exchange: String,
    pub routing_key: String,
    pub data: Vec<u8>,
    pub acker: Arc<dyn DeliveryAcker>,
}

/// Callback attached to a queue by `BrokerChannel::consume`.
pub trait DeliveryHandler: Send + Sync {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, ()>;
}

/// Establishes broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>>;
}

/// A broker channel. Operations may be issued concurrently; the client multiplexes them.
///
/// Exchanges are always declared with direct (exact topic) routing.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn assert_exchange(&self, name: &str, options: DeclareOptions) -> Result<()>;

    async fn assert_queue(&self, name: &str, options: DeclareOptions) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, topic: &str) -> Result<()>;

    async fn publish(&self, exchange: &str, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn send_to_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()>;

    /// Attach `handler` to `queue`. Returns once the consumer is registered;
    /// deliveries arrive asynchronously afterwards.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<()>;
}
