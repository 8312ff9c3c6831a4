//! Mock broker implementation for testing.
//!
//! Records every call issued against it and lets tests inject deliveries into
//! attached consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, ConsumeOptions,
    DeclareOptions, Delivery, DeliveryAcker, DeliveryHandler, Result,
};

/// A broker operation as observed by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    AssertExchange {
        name: String,
        options: DeclareOptions,
    },
    AssertQueue {
        name: String,
        options: DeclareOptions,
    },
    BindQueue {
        queue: String,
        exchange: String,
        topic: String,
    },
    Publish {
        exchange: String,
        topic: String,
        payload: Vec<u8>,
    },
    SendToQueue {
        queue: String,
        payload: Vec<u8>,
    },
    Consume {
        queue: String,
        no_ack: bool,
    },
}

#[derive(Default)]
struct MockState {
    connects: AtomicUsize,
    channels: AtomicUsize,
    calls: RwLock<Vec<BrokerCall>>,
    consumers: RwLock<HashMap<String, Arc<dyn DeliveryHandler>>>,
    fail_on_connect: RwLock<bool>,
    fail_on_assert_exchange: RwLock<Option<String>>,
    connect_delay: RwLock<Option<Duration>>,
}

/// Mock broker for testing.
///
/// Cheap to clone; clones share state, so a test can hand one clone to the
/// stream as its connector and inspect the other.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_connect(&self, fail: bool) {
        *self.state.fail_on_connect.write().await = fail;
    }

    /// Fail `assert_exchange` for the named exchange.
    pub async fn set_fail_on_assert_exchange(&self, name: Option<&str>) {
        *self.state.fail_on_assert_exchange.write().await = name.map(str::to_string);
    }

    /// Delay each connect attempt, widening the window for concurrent callers.
    pub async fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.write().await = Some(delay);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn channel_count(&self) -> usize {
        self.state.channels.load(Ordering::SeqCst)
    }

    pub async fn calls(&self) -> Vec<BrokerCall> {
        self.state.calls.read().await.clone()
    }

    pub async fn asserted_exchanges(&self) -> Vec<String> {
        self.filter_calls(|call| match call {
            BrokerCall::AssertExchange { name, .. } => Some(name.clone()),
            _ => None,
        })
        .await
    }

    pub async fn asserted_queues(&self) -> Vec<String> {
        self.filter_calls(|call| match call {
            BrokerCall::AssertQueue { name, .. } => Some(name.clone()),
            _ => None,
        })
        .await
    }

    /// Bindings as `(exchange, queue, topic)`.
    pub async fn bindings(&self) -> Vec<(String, String, String)> {
        self.filter_calls(|call| match call {
            BrokerCall::BindQueue {
                queue,
                exchange,
                topic,
            } => Some((exchange.clone(), queue.clone(), topic.clone())),
            _ => None,
        })
        .await
    }

    /// Consumers as `(queue, no_ack)`.
    pub async fn consumers(&self) -> Vec<(String, bool)> {
        self.filter_calls(|call| match call {
            BrokerCall::Consume { queue, no_ack } => Some((queue.clone(), *no_ack)),
            _ => None,
        })
        .await
    }

    async fn filter_calls<T>(&self, f: impl Fn(&BrokerCall) -> Option<T>) -> Vec<T> {
        self.state.calls.read().await.iter().filter_map(f).collect()
    }

    /// Deliver a message to the consumer attached to `queue`.
    ///
    /// Returns `None` if no consumer is attached. Resolves once the handler has
    /// finished with the delivery.
    pub async fn deliver(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        data: Vec<u8>,
    ) -> Option<Arc<MockAcker>> {
        let handler = self.state.consumers.read().await.get(queue).cloned()?;
        let acker = Arc::new(MockAcker::default());
        handler
            .handle(Delivery {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                data,
                acker: acker.clone(),
            })
            .await;
        Some(acker)
    }

    async fn record(&self, call: BrokerCall) {
        self.state.calls.write().await.push(call);
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>> {
        let delay = *self.state.connect_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.state.fail_on_connect.read().await {
            return Err(BrokerError::Backend("Mock connect failure".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BrokerConnection for MockBroker {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        self.state.channels.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl BrokerChannel for MockBroker {
    async fn assert_exchange(&self, name: &str, options: DeclareOptions) -> Result<()> {
        if self.state.fail_on_assert_exchange.read().await.as_deref() == Some(name) {
            return Err(BrokerError::Backend(format!(
                "Mock exchange conflict: {}",
                name
            )));
        }
        self.record(BrokerCall::AssertExchange {
            name: name.to_string(),
            options,
        })
        .await;
        Ok(())
    }

    async fn assert_queue(&self, name: &str, options: DeclareOptions) -> Result<()> {
        self.record(BrokerCall::AssertQueue {
            name: name.to_string(),
            options,
        })
        .await;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, topic: &str) -> Result<()> {
        self.record(BrokerCall::BindQueue {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            topic: topic.to_string(),
        })
        .await;
        Ok(())
    }

    async fn publish(&self, exchange: &str, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.record(BrokerCall::Publish {
            exchange: exchange.to_string(),
            topic: topic.to_string(),
            payload,
        })
        .await;
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        self.record(BrokerCall::SendToQueue {
            queue: queue.to_string(),
            payload,
        })
        .await;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<()> {
        self.state
            .consumers
            .write()
            .await
            .insert(queue.to_string(), handler);
        self.record(BrokerCall::Consume {
            queue: queue.to_string(),
            no_ack: options.no_ack,
        })
        .await;
        Ok(())
    }
}

/// Acker that counts settlements.
#[derive(Debug, Default)]
pub struct MockAcker {
    acks: AtomicUsize,
    rejects: AtomicUsize,
}

impl MockAcker {
    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }

    pub fn rejects(&self) -> usize {
        self.rejects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryAcker for MockAcker {
    async fn ack(&self) -> Result<()> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<()> {
        self.rejects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
