//! Point-to-point messaging on named queues.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::broker::{ConsumeOptions, RESOURCE_POLICY};
use crate::codec::encode_direct;
use crate::connection::ConnectionManager;
use crate::error::{Result, StreamError};
use crate::handler::{AutoAckConsumer, DirectListener};

/// Sends to and listens on queues by name, bypassing exchanges.
#[derive(Clone)]
pub struct DirectChannel {
    connection: Arc<ConnectionManager>,
}

impl DirectChannel {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Send `payload` straight to the queue named by `queue`.
    ///
    /// The queue is not asserted here; it exists once someone listens on it.
    #[tracing::instrument(name = "stream.direct_to", skip_all, fields(queue = %queue))]
    pub async fn direct_to<R, T>(&self, queue: R, payload: &T) -> Result<()>
    where
        R: fmt::Display,
        T: Serialize + ?Sized,
    {
        let queue = queue.to_string();
        let content = encode_direct(payload)?;
        let channel = self.connection.get_channel().await?;

        channel
            .send_to_queue(&queue, content)
            .await
            .map_err(|e| StreamError::publish(&queue, e))?;

        debug!(queue = %queue, "Sent direct message");
        Ok(())
    }

    /// Assert the queue and consume it with automatic acknowledgment.
    #[tracing::instrument(name = "stream.listen_to", skip_all, fields(queue = %queue))]
    pub async fn listen_to<R, L>(&self, queue: R, listener: L) -> Result<()>
    where
        R: fmt::Display,
        L: DirectListener + 'static,
    {
        let queue = queue.to_string();
        let channel = self.connection.get_channel().await?;

        channel
            .assert_queue(&queue, RESOURCE_POLICY)
            .await
            .map_err(|e| StreamError::topology(&queue, e))?;

        let consumer = AutoAckConsumer::new(&queue, Arc::new(listener));
        channel
            .consume(&queue, Arc::new(consumer), ConsumeOptions::auto_ack())
            .await
            .map_err(|e| StreamError::consume(&queue, e))?;

        debug!(queue = %queue, "Listening on direct queue");
        Ok(())
    }
}
