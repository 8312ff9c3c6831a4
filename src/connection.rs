//! Shared broker connection.
//!
//! One connection and one channel per manager, opened on first use. Every
//! stream component borrows the channel from here instead of holding its own.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::broker::{BrokerChannel, BrokerConnection, BrokerConnector};
use crate::error::{Result, StreamError};

struct Session {
    // Held so the connection lives as long as its channel.
    _connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
}

/// Lazily opens and memoizes the broker channel.
///
/// Concurrent first callers share a single connection attempt. A failed
/// attempt is not cached; the next call tries again.
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    session: OnceCell<Session>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            session: OnceCell::new(),
        }
    }

    /// Get the shared channel, connecting on first use.
    pub async fn get_channel(&self) -> Result<Arc<dyn BrokerChannel>> {
        let session = self
            .session
            .get_or_try_init(|| async {
                debug!("Opening broker connection");
                let connection = self
                    .connector
                    .connect()
                    .await
                    .map_err(|source| StreamError::Connection { source })?;
                let channel = connection
                    .create_channel()
                    .await
                    .map_err(|source| StreamError::Connection { source })?;
                info!("Broker channel ready");
                Ok::<_, StreamError>(Session {
                    _connection: connection,
                    channel,
                })
            })
            .await?;

        Ok(session.channel.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.session.initialized()
    }
}
