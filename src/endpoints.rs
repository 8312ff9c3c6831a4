//! Endpoint naming.
//!
//! Exchange and queue names are pure functions of their routing coordinates:
//!
//! ```text
//! exchange: {scope}:{type}::{level}
//! queue:    {scope}:{type}::{channel}
//! ```
//!
//! Independently deployed processes that share the same vocabulary converge on
//! the same broker topology without coordinating.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Visibility level of an event; selects the exchange it is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamLevel {
    Public,
    Private,
}

impl StreamLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamLevel::Public => "Public",
            StreamLevel::Private => "Private",
        }
    }
}

impl fmt::Display for StreamLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purpose of a consuming queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventChannel {
    /// Events a service owns and handles itself.
    EventHandler,
    /// Events from other scopes a service reacts to.
    EventReaction,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventChannel::EventHandler => "EventHandler",
            EventChannel::EventReaction => "EventReaction",
        }
    }
}

impl fmt::Display for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinates of an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeRef {
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub level: StreamLevel,
}

impl ExchangeRef {
    pub fn new(scope: impl Into<String>, event_type: impl Into<String>, level: StreamLevel) -> Self {
        Self {
            scope: scope.into(),
            event_type: event_type.into(),
            level,
        }
    }

    pub fn name(&self) -> String {
        to_exchange(self)
    }
}

/// Coordinates of a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueRef {
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub channel: EventChannel,
}

impl QueueRef {
    pub fn new(
        scope: impl Into<String>,
        event_type: impl Into<String>,
        channel: EventChannel,
    ) -> Self {
        Self {
            scope: scope.into(),
            event_type: event_type.into(),
            channel,
        }
    }

    pub fn name(&self) -> String {
        to_queue(self)
    }
}

/// Resolve the exchange name for `(scope, type, level)`.
pub fn to_exchange(on: &ExchangeRef) -> String {
    format!("{}:{}::{}", on.scope, on.event_type, on.level)
}

/// Resolve the queue name for `(scope, type, channel)`.
pub fn to_queue(to: &QueueRef) -> String {
    format!("{}:{}::{}", to.scope, to.event_type, to.channel)
}
