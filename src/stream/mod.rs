//! Application-facing event stream.
//!
//! [`EventStream`] bundles the point-to-point channel, the publisher, the
//! ad-hoc subscriber and the definition-driven topology engine around one
//! injected [`ConnectionManager`], so every path shares a single broker
//! channel.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::broker::BrokerConnector;
use crate::codec::{Event, Metadata};
use crate::connection::ConnectionManager;
use crate::endpoints::QueueRef;
use crate::error::Result;
use crate::handler::{DirectListener, EventProcessor};
use crate::topology::{ConflictPolicy, StreamDefinition, TopologyEngine, TopologyPlan};

mod direct;
mod publisher;
mod subscriber;

pub use direct::DirectChannel;
pub use publisher::{PublishReceipt, PublishTarget, Publisher};
pub use subscriber::{SubscribeOn, Subscriber, SubscriptionReceipt};

pub struct EventStream {
    connection: Arc<ConnectionManager>,
    direct: DirectChannel,
    publisher: Publisher,
    subscriber: Subscriber,
    topology: TopologyEngine,
}

impl EventStream {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::with_connection(Arc::new(ConnectionManager::new(connector)))
    }

    /// Build on an existing connection manager, sharing its channel.
    pub fn with_connection(connection: Arc<ConnectionManager>) -> Self {
        Self {
            direct: DirectChannel::new(connection.clone()),
            publisher: Publisher::new(connection.clone()),
            subscriber: Subscriber::new(connection.clone()),
            topology: TopologyEngine::new(connection.clone()),
            connection,
        }
    }

    /// Connect to RabbitMQ as described by `config`.
    #[cfg(feature = "amqp")]
    pub fn from_config(config: &crate::config::Config) -> Self {
        let connector = crate::broker::AmqpConnector::new(config.amqp.clone());
        Self::new(Arc::new(connector)).with_conflict_policy(config.topology.conflict_policy)
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.topology = self.topology.with_conflict_policy(policy);
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub async fn direct_to<R, T>(&self, queue: R, payload: &T) -> Result<()>
    where
        R: fmt::Display,
        T: Serialize + ?Sized,
    {
        self.direct.direct_to(queue, payload).await
    }

    pub async fn listen_to<R, L>(&self, queue: R, listener: L) -> Result<()>
    where
        R: fmt::Display,
        L: DirectListener + 'static,
    {
        self.direct.listen_to(queue, listener).await
    }

    pub async fn publish(
        &self,
        event: &Event,
        on: &PublishTarget,
        metadata: &Metadata,
    ) -> Result<PublishReceipt> {
        self.publisher.publish(event, on, metadata).await
    }

    pub async fn subscribe<P>(
        &self,
        on: SubscribeOn,
        to: QueueRef,
        process: P,
    ) -> Result<SubscriptionReceipt>
    where
        P: EventProcessor + 'static,
    {
        self.subscriber.subscribe(on, to, process).await
    }

    /// Register a stream definition for the next [`connect`](Self::connect).
    pub async fn register(&self, definition: StreamDefinition) -> Result<()> {
        self.topology.subscribe(definition).await
    }

    /// Activate the topology of every registered definition.
    pub async fn connect(&self) -> Result<()> {
        self.topology.connect().await
    }

    pub async fn plan(&self) -> TopologyPlan {
        self.topology.plan().await
    }
}
