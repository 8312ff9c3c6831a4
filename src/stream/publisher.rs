//! Routed event publishing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::broker::RESOURCE_POLICY;
use crate::codec::{encode_envelope, Event, Metadata};
use crate::connection::ConnectionManager;
use crate::endpoints::{ExchangeRef, StreamLevel};
use crate::error::{Result, StreamError};

/// Where an event is published: the owning scope and its visibility level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTarget {
    pub scope: String,
    pub level: StreamLevel,
}

impl PublishTarget {
    pub fn new(scope: impl Into<String>, level: StreamLevel) -> Self {
        Self {
            scope: scope.into(),
            level,
        }
    }
}

/// Routing coordinates an event was published under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub level: StreamLevel,
    pub name: String,
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Publishes events to the exchange implied by `(scope, type, level)` under topic `name`.
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<ConnectionManager>,
}

impl Publisher {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    #[tracing::instrument(
        name = "stream.publish",
        skip_all,
        fields(scope = %on.scope, event = %event.name)
    )]
    pub async fn publish(
        &self,
        event: &Event,
        on: &PublishTarget,
        metadata: &Metadata,
    ) -> Result<PublishReceipt> {
        let exchange = ExchangeRef::new(&on.scope, &event.event_type, on.level).name();
        let topic = event.name.as_str();
        let content = encode_envelope(event, metadata)?;
        let channel = self.connection.get_channel().await?;

        channel
            .assert_exchange(&exchange, RESOURCE_POLICY)
            .await
            .map_err(|e| StreamError::topology(&exchange, e))?;
        channel
            .publish(&exchange, topic, content)
            .await
            .map_err(|e| StreamError::publish(&exchange, e))?;

        debug!(exchange = %exchange, topic = %topic, "Published event");

        Ok(PublishReceipt {
            level: on.level,
            name: event.name.clone(),
            scope: on.scope.clone(),
            event_type: event.event_type.clone(),
        })
    }
}
