//! eventstream - declarative event streams over a message broker
//!
//! Services describe the events they handle and the foreign events they react
//! to; the crate turns those descriptions into broker exchanges, queues and
//! bindings and attaches acknowledging consumers, all over one shared channel.
//!
//! ## Modules
//!
//! - [`endpoints`]: exchange and queue naming
//! - [`codec`]: event envelope wire format
//! - [`broker`]: broker client contract, AMQP and mock implementations
//! - [`connection`]: lazily opened, shared broker channel
//! - [`handler`]: processors, acknowledgment and consumers
//! - [`stream`]: direct send/listen, publish, ad-hoc subscribe
//! - [`topology`]: definition-driven topology activation

pub mod broker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoints;
pub mod error;
pub mod handler;
pub mod stream;
pub mod topology;
pub mod utils;

pub use codec::{Event, Metadata};
pub use connection::ConnectionManager;
pub use error::{HandlerError, StreamError};
pub use handler::{Ack, EventProcessor};
pub use stream::EventStream;
pub use topology::{StreamDefinition, TopologyEngine};
