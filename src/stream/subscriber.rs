//! Single-route subscriptions with manual acknowledgment.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::{ConsumeOptions, RESOURCE_POLICY};
use crate::connection::ConnectionManager;
use crate::endpoints::{ExchangeRef, QueueRef, StreamLevel};
use crate::error::{Result, StreamError};
use crate::handler::{Dispatch, EventProcessor, ManualAckConsumer};

/// The event a subscription listens for: its exchange coordinates plus topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOn {
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub level: StreamLevel,
    pub name: String,
}

impl SubscribeOn {
    pub fn new(
        scope: impl Into<String>,
        event_type: impl Into<String>,
        level: StreamLevel,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            event_type: event_type.into(),
            level,
            name: name.into(),
        }
    }

    pub fn exchange(&self) -> ExchangeRef {
        ExchangeRef::new(&self.scope, &self.event_type, self.level)
    }
}

/// Routing a subscription was set up with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionReceipt {
    pub on: SubscribeOn,
    pub to: QueueRef,
}

/// Declares one exchange/queue/binding per call and consumes it.
#[derive(Clone)]
pub struct Subscriber {
    connection: Arc<ConnectionManager>,
}

impl Subscriber {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Bind queue `to` to the exchange of `on` under topic `on.name` and hand
    /// each delivery to `process`, which owns acknowledgment.
    #[tracing::instrument(
        name = "stream.subscribe",
        skip_all,
        fields(scope = %on.scope, event = %on.name)
    )]
    pub async fn subscribe<P>(
        &self,
        on: SubscribeOn,
        to: QueueRef,
        process: P,
    ) -> Result<SubscriptionReceipt>
    where
        P: EventProcessor + 'static,
    {
        let exchange = on.exchange().name();
        let queue = to.name();
        let channel = self.connection.get_channel().await?;

        channel
            .assert_exchange(&exchange, RESOURCE_POLICY)
            .await
            .map_err(|e| StreamError::topology(&exchange, e))?;
        channel
            .assert_queue(&queue, RESOURCE_POLICY)
            .await
            .map_err(|e| StreamError::topology(&queue, e))?;
        channel
            .bind_queue(&queue, &exchange, &on.name)
            .await
            .map_err(|e| StreamError::topology(format!("{} -> {}", exchange, queue), e))?;

        let consumer = ManualAckConsumer::new(&queue, Dispatch::Single(Arc::new(process)));
        channel
            .consume(&queue, Arc::new(consumer), ConsumeOptions::manual_ack())
            .await
            .map_err(|e| StreamError::consume(&queue, e))?;

        info!(exchange = %exchange, queue = %queue, topic = %on.name, "Subscribed");

        Ok(SubscriptionReceipt { on, to })
    }
}
