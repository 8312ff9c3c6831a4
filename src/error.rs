//! Stream errors.
//!
//! Each variant names the operation that failed. Broker failures keep the
//! broker-native error as their `source()`.

use crate::broker::BrokerError;

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Error returned by an application-supplied processor or listener.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Connection failed: {source}")]
    Connection {
        #[source]
        source: BrokerError,
    },

    #[error("Topology assertion failed for '{resource}': {source}")]
    Topology {
        resource: String,
        #[source]
        source: BrokerError,
    },

    #[error("Publish to '{target}' failed: {source}")]
    Publish {
        target: String,
        #[source]
        source: BrokerError,
    },

    #[error("Consume on '{queue}' failed: {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Stream definitions are active or activating; register before connecting")]
    AlreadyActive,

    #[error("Definition '{definition}' reacts to scope '{scope}' without a process for it")]
    UnknownReactionScope { definition: String, scope: String },

    #[error("Definition '{definition}' handles event '{event}' of foreign type '{event_type}'")]
    ForeignEventType {
        definition: String,
        event: String,
        event_type: String,
    },

    #[error("Queue '{queue}' is already owned by definition #{owner}; rejected definition #{rejected}")]
    QueueConflict {
        queue: String,
        owner: usize,
        rejected: usize,
    },
}

impl StreamError {
    pub(crate) fn topology(resource: impl Into<String>, source: BrokerError) -> Self {
        StreamError::Topology {
            resource: resource.into(),
            source,
        }
    }

    pub(crate) fn publish(target: impl Into<String>, source: BrokerError) -> Self {
        StreamError::Publish {
            target: target.into(),
            source,
        }
    }

    pub(crate) fn consume(queue: impl Into<String>, source: BrokerError) -> Self {
        StreamError::Consume {
            queue: queue.into(),
            source,
        }
    }

    /// Broker-native error behind this failure, if any.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            StreamError::Connection { source }
            | StreamError::Topology { source, .. }
            | StreamError::Publish { source, .. }
            | StreamError::Consume { source, .. } => Some(source),
            _ => None,
        }
    }
}
