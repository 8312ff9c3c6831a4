//! Stream definitions: one service's routing intent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::endpoints::{EventChannel, QueueRef, StreamLevel};
use crate::error::{Result, StreamError};
use crate::handler::EventProcessor;

/// An event kind a service owns, with its visibility level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub level: StreamLevel,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>, event_type: impl Into<String>, level: StreamLevel) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            level,
        }
    }
}

/// A foreign event a service reacts to. Always read from the public level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionDescriptor {
    pub scope: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub name: String,
}

impl ReactionDescriptor {
    pub fn new(
        scope: impl Into<String>,
        event_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            event_type: event_type.into(),
            name: name.into(),
        }
    }
}

/// Events the service handles, all processed by one processor.
#[derive(Clone)]
pub struct Handlers {
    pub events: Vec<EventDescriptor>,
    pub processing: Arc<dyn EventProcessor>,
}

/// Foreign events the service reacts to, with one processor per foreign scope.
#[derive(Clone, Default)]
pub struct Reactions {
    pub events: Vec<ReactionDescriptor>,
    pub processes: HashMap<String, Arc<dyn EventProcessor>>,
}

/// One service's routing intent.
///
/// ```ignore
/// let definition = StreamDefinition::new("orders", "created")
///     .handle(vec![EventDescriptor::new("OrderPlaced", "created", StreamLevel::Public)], on_order)
///     .react_to(ReactionDescriptor::new("billing", "invoice", "InvoicePaid"))
///     .process_reactions("billing", on_invoice);
/// ```
#[derive(Clone)]
pub struct StreamDefinition {
    pub scope: String,
    pub event_type: String,
    pub handlers: Option<Handlers>,
    pub reactions: Reactions,
}

impl StreamDefinition {
    pub fn new(scope: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            event_type: event_type.into(),
            handlers: None,
            reactions: Reactions::default(),
        }
    }

    pub fn handle<P>(mut self, events: Vec<EventDescriptor>, processing: P) -> Self
    where
        P: EventProcessor + 'static,
    {
        self.handlers = Some(Handlers {
            events,
            processing: Arc::new(processing),
        });
        self
    }

    pub fn react_to(mut self, reaction: ReactionDescriptor) -> Self {
        self.reactions.events.push(reaction);
        self
    }

    pub fn process_reactions<P>(mut self, scope: impl Into<String>, process: P) -> Self
    where
        P: EventProcessor + 'static,
    {
        self.reactions
            .processes
            .insert(scope.into(), Arc::new(process));
        self
    }

    /// Queue for handled events, if the definition handles any.
    pub fn handler_queue(&self) -> Option<String> {
        self.handlers
            .as_ref()
            .filter(|h| !h.events.is_empty())
            .map(|_| self.queue(EventChannel::EventHandler))
    }

    /// Queue for reactions, if the definition reacts to anything.
    pub fn reaction_queue(&self) -> Option<String> {
        (!self.reactions.events.is_empty()).then(|| self.queue(EventChannel::EventReaction))
    }

    fn queue(&self, channel: EventChannel) -> String {
        QueueRef::new(&self.scope, &self.event_type, channel).name()
    }

    /// Handled events must carry the definition's own type, and every reaction
    /// must name a scope that has a process.
    pub fn validate(&self) -> Result<()> {
        for event in self.handlers.iter().flat_map(|h| &h.events) {
            if event.event_type != self.event_type {
                return Err(StreamError::ForeignEventType {
                    definition: self.to_string(),
                    event: event.name.clone(),
                    event_type: event.event_type.clone(),
                });
            }
        }
        for reaction in &self.reactions.events {
            if !self.reactions.processes.contains_key(&reaction.scope) {
                return Err(StreamError::UnknownReactionScope {
                    definition: self.to_string(),
                    scope: reaction.scope.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for StreamDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.event_type)
    }
}
