//! Application handlers and the consumers that drive them.
//!
//! - [`EventProcessor`]: processes a routed event and settles it through [`Ack`]
//! - [`DirectListener`]: receives point-to-point messages
//! - [`ManualAckConsumer`] / [`AutoAckConsumer`]: broker-facing delivery handlers

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::broker::{self, Delivery, DeliveryAcker, DeliveryHandler};
use crate::codec::{decode_envelope, DirectMessage, Event, Metadata};
use crate::error::HandlerError;

/// Acknowledges one delivery on a manual-ack queue.
///
/// Until `ack` is called the broker holds the message as unacknowledged.
/// Calling it more than once is left to the broker client to absorb.
#[derive(Clone)]
pub struct Ack {
    acker: Arc<dyn DeliveryAcker>,
}

impl Ack {
    pub fn new(acker: Arc<dyn DeliveryAcker>) -> Self {
        Self { acker }
    }

    pub async fn ack(&self) -> broker::Result<()> {
        self.acker.ack().await
    }
}

/// Processes routed events.
///
/// Implemented for any `Fn(Event, Metadata, Ack) -> Future<Output = Result<(), HandlerError>>`.
pub trait EventProcessor: Send + Sync {
    fn process(
        &self,
        event: Event,
        metadata: Metadata,
        ack: Ack,
    ) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> EventProcessor for F
where
    F: Fn(Event, Metadata, Ack) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn process(
        &self,
        event: Event,
        metadata: Metadata,
        ack: Ack,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(event, metadata, ack))
    }
}

/// Receives messages from a direct queue.
pub trait DirectListener: Send + Sync {
    fn on_message(&self, message: DirectMessage) -> BoxFuture<'static, Result<(), HandlerError>>;
}

impl<F, Fut> DirectListener for F
where
    F: Fn(DirectMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn on_message(&self, message: DirectMessage) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(self(message))
    }
}

/// How a manual-ack queue picks the processor for a delivery.
#[derive(Clone)]
pub enum Dispatch {
    /// Every delivery goes to one processor.
    Single(Arc<dyn EventProcessor>),
    /// Deliveries are routed by the exchange they were published to.
    ByExchange(HashMap<String, Arc<dyn EventProcessor>>),
}

impl Dispatch {
    fn select(&self, exchange: &str) -> Option<Arc<dyn EventProcessor>> {
        match self {
            Dispatch::Single(processor) => Some(processor.clone()),
            Dispatch::ByExchange(routes) => routes.get(exchange).cloned(),
        }
    }
}

/// Decodes `{event, metadata}` envelopes and hands them to a processor.
///
/// Acknowledgment is left entirely to the processor. A processor error is
/// logged and the message stays unacknowledged. Messages that cannot be
/// decoded or routed are rejected without requeue.
pub struct ManualAckConsumer {
    queue: String,
    dispatch: Dispatch,
}

impl ManualAckConsumer {
    pub fn new(queue: impl Into<String>, dispatch: Dispatch) -> Self {
        Self {
            queue: queue.into(),
            dispatch,
        }
    }
}

impl DeliveryHandler for ManualAckConsumer {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, ()> {
        let queue = self.queue.clone();
        let processor = self.dispatch.select(&delivery.exchange);

        Box::pin(async move {
            let Some(processor) = processor else {
                warn!(
                    queue = %queue,
                    exchange = %delivery.exchange,
                    "No processor for source exchange, rejecting"
                );
                if let Err(e) = delivery.acker.reject(false).await {
                    error!(error = %e, "Failed to reject message");
                }
                return;
            };

            let envelope = match decode_envelope(&delivery.data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to decode envelope");
                    if let Err(e) = delivery.acker.reject(false).await {
                        error!(error = %e, "Failed to reject message");
                    }
                    return;
                }
            };

            debug!(
                queue = %queue,
                routing_key = %delivery.routing_key,
                event = %envelope.event.name,
                "Received event"
            );

            let ack = Ack::new(delivery.acker);
            if let Err(e) = processor
                .process(envelope.event, envelope.metadata, ack)
                .await
            {
                error!(queue = %queue, error = %e, "Processor failed");
            }
        })
    }
}

/// Hands raw messages to a listener. The broker settles them on delivery.
pub struct AutoAckConsumer {
    queue: String,
    listener: Arc<dyn DirectListener>,
}

impl AutoAckConsumer {
    pub fn new(queue: impl Into<String>, listener: Arc<dyn DirectListener>) -> Self {
        Self {
            queue: queue.into(),
            listener,
        }
    }
}

impl DeliveryHandler for AutoAckConsumer {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, ()> {
        let message = DirectMessage {
            queue: self.queue.clone(),
            data: delivery.data,
        };
        let listener = self.listener.clone();

        Box::pin(async move {
            let queue = message.queue.clone();
            if let Err(e) = listener.on_message(message).await {
                error!(queue = %queue, error = %e, "Listener failed");
            }
        })
    }
}
