//! Topology planning.
//!
//! Folds registered definitions into the deduplicated set of exchanges,
//! queues and bindings they imply. Pure; no broker calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::endpoints::{ExchangeRef, StreamLevel};
use crate::handler::{Dispatch, EventProcessor};

use super::definition::StreamDefinition;

/// A queue and the consumer that will be attached to it.
#[derive(Clone)]
pub struct QueuePlan {
    pub name: String,
    /// Registration index of the definition whose processor consumes this queue.
    pub owner: usize,
    pub dispatch: Dispatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Binding {
    pub exchange: String,
    pub queue: String,
    pub topic: String,
}

/// A later definition resolved to a queue an earlier one already owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConflict {
    pub queue: String,
    pub owner: usize,
    pub rejected: usize,
}

/// Topology for one activation.
#[derive(Clone, Default)]
pub struct TopologyPlan {
    /// Exchange names, first-seen order.
    pub exchanges: Vec<String>,
    /// Queues, first-seen order. First definition to claim a queue owns its consumer.
    pub queues: Vec<QueuePlan>,
    pub binds: Vec<Binding>,
    pub conflicts: Vec<QueueConflict>,
}

impl TopologyPlan {
    /// Build the plan for `definitions`, processed in registration order.
    pub fn build(definitions: &[StreamDefinition]) -> Self {
        let mut builder = PlanBuilder::default();

        for (index, definition) in definitions.iter().enumerate() {
            if let (Some(handlers), Some(queue)) =
                (&definition.handlers, definition.handler_queue())
            {
                builder.add_queue(&queue, index, || {
                    Dispatch::Single(handlers.processing.clone())
                });
                for event in &handlers.events {
                    let exchange =
                        ExchangeRef::new(&definition.scope, &definition.event_type, event.level)
                            .name();
                    builder.add_exchange(&exchange);
                    builder.add_binding(exchange, &queue, &event.name);
                }
            }

            if let Some(queue) = definition.reaction_queue() {
                builder.add_queue(&queue, index, || Dispatch::ByExchange(HashMap::new()));
                builder.add_routes(&queue, reaction_routes(definition));
                for reaction in &definition.reactions.events {
                    let exchange =
                        ExchangeRef::new(&reaction.scope, &reaction.event_type, StreamLevel::Public)
                            .name();
                    builder.add_exchange(&exchange);
                    builder.add_binding(exchange, &queue, &reaction.name);
                }
            }
        }

        builder.plan
    }

    pub fn queue(&self, name: &str) -> Option<&QueuePlan> {
        self.queues.iter().find(|q| q.name == name)
    }
}

/// Map each reaction's source exchange to the process registered for its scope.
fn reaction_routes(definition: &StreamDefinition) -> HashMap<String, Arc<dyn EventProcessor>> {
    definition
        .reactions
        .events
        .iter()
        .filter_map(|reaction| {
            let process = definition.reactions.processes.get(&reaction.scope)?;
            let exchange =
                ExchangeRef::new(&reaction.scope, &reaction.event_type, StreamLevel::Public).name();
            Some((exchange, process.clone()))
        })
        .collect()
}

#[derive(Default)]
struct PlanBuilder {
    plan: TopologyPlan,
    exchanges: HashSet<String>,
    queue_owners: HashMap<String, usize>,
    binds: HashSet<Binding>,
}

impl PlanBuilder {
    fn add_exchange(&mut self, name: &str) {
        if self.exchanges.insert(name.to_string()) {
            self.plan.exchanges.push(name.to_string());
        }
    }

    fn add_queue(&mut self, name: &str, owner: usize, dispatch: impl FnOnce() -> Dispatch) {
        match self.queue_owners.get(name) {
            Some(&existing) if existing != owner => {
                self.plan.conflicts.push(QueueConflict {
                    queue: name.to_string(),
                    owner: existing,
                    rejected: owner,
                });
            }
            Some(_) => {}
            None => {
                self.queue_owners.insert(name.to_string(), owner);
                self.plan.queues.push(QueuePlan {
                    name: name.to_string(),
                    owner,
                    dispatch: dispatch(),
                });
            }
        }
    }

    /// Merge routes into a queue's exchange dispatch. Every binding a later
    /// definition adds to the queue gets a processor; an exchange already
    /// routed keeps its first process.
    fn add_routes(&mut self, queue: &str, routes: HashMap<String, Arc<dyn EventProcessor>>) {
        let Some(plan) = self.plan.queues.iter_mut().find(|q| q.name == queue) else {
            return;
        };
        if let Dispatch::ByExchange(existing) = &mut plan.dispatch {
            for (exchange, process) in routes {
                existing.entry(exchange).or_insert(process);
            }
        }
    }

    fn add_binding(&mut self, exchange: String, queue: &str, topic: &str) {
        let binding = Binding {
            exchange,
            queue: queue.to_string(),
            topic: topic.to_string(),
        };
        if self.binds.insert(binding.clone()) {
            self.plan.binds.push(binding);
        }
    }
}
