//! Definition-driven topology.
//!
//! Services register [`StreamDefinition`]s; a single [`TopologyEngine::connect`]
//! merges every registered definition into one deduplicated topology and
//! establishes it in phases:
//!
//! ```text
//! assert exchanges -> assert queues -> bind -> attach consumers
//! ```
//!
//! Each phase runs its broker calls concurrently and completes before the
//! next begins.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{ConsumeOptions, RESOURCE_POLICY};
use crate::connection::ConnectionManager;
use crate::error::{Result, StreamError};
use crate::handler::ManualAckConsumer;

mod definition;
mod plan;

pub use definition::{EventDescriptor, Handlers, ReactionDescriptor, Reactions, StreamDefinition};
pub use plan::{Binding, QueueConflict, QueuePlan, TopologyPlan};

/// What to do when two definitions resolve to the same queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the first definition's consumer and log the conflict.
    #[default]
    Warn,
    /// Refuse to register the later definition.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Activating,
    Active,
}

struct EngineState {
    phase: Phase,
    definitions: Vec<StreamDefinition>,
}

/// Collects stream definitions and activates their topology once.
pub struct TopologyEngine {
    connection: Arc<ConnectionManager>,
    policy: ConflictPolicy,
    state: Mutex<EngineState>,
    // Held for a whole activation; `state` is only locked around phase changes.
    activation: Mutex<()>,
}

impl TopologyEngine {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            policy: ConflictPolicy::default(),
            state: Mutex::new(EngineState {
                phase: Phase::Collecting,
                definitions: Vec::new(),
            }),
            activation: Mutex::new(()),
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Register a definition. Only valid before [`connect`](Self::connect) succeeds.
    pub async fn subscribe(&self, definition: StreamDefinition) -> Result<()> {
        definition.validate()?;

        let mut state = self.state.lock().await;
        if state.phase != Phase::Collecting {
            return Err(StreamError::AlreadyActive);
        }

        if self.policy == ConflictPolicy::Reject {
            let rejected = state.definitions.len();
            let mut candidate = state.definitions.clone();
            candidate.push(definition.clone());
            if let Some(conflict) = TopologyPlan::build(&candidate)
                .conflicts
                .into_iter()
                .find(|c| c.rejected == rejected)
            {
                return Err(StreamError::QueueConflict {
                    queue: conflict.queue,
                    owner: conflict.owner,
                    rejected: conflict.rejected,
                });
            }
        }

        debug!(definition = %definition, "Registered stream definition");
        state.definitions.push(definition);
        Ok(())
    }

    /// Topology the registered definitions currently imply.
    pub async fn plan(&self) -> TopologyPlan {
        TopologyPlan::build(&self.state.lock().await.definitions)
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.phase == Phase::Active
    }

    /// Establish the merged topology and attach consumers.
    ///
    /// Runs once; later calls return immediately. Registration is closed while
    /// the broker phases run. On failure nothing is rolled back and the engine
    /// returns to collecting, so the call can be retried.
    #[tracing::instrument(name = "stream.connect", skip_all)]
    pub async fn connect(&self) -> Result<()> {
        let _activation = self.activation.lock().await;

        let (plan, definitions) = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Active {
                debug!("Topology already active");
                return Ok(());
            }
            state.phase = Phase::Activating;
            (
                TopologyPlan::build(&state.definitions),
                state.definitions.len(),
            )
        };

        let result = self.activate(&plan).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                state.phase = Phase::Active;
                info!(
                    definitions,
                    exchanges = plan.exchanges.len(),
                    queues = plan.queues.len(),
                    bindings = plan.binds.len(),
                    "Stream topology active"
                );
                Ok(())
            }
            Err(e) => {
                state.phase = Phase::Collecting;
                Err(e)
            }
        }
    }

    async fn activate(&self, plan: &TopologyPlan) -> Result<()> {
        let channel = self.connection.get_channel().await?;
        let channel = channel.as_ref();

        for conflict in &plan.conflicts {
            warn!(
                queue = %conflict.queue,
                owner = conflict.owner,
                rejected = conflict.rejected,
                "Queue claimed by more than one definition, keeping first consumer"
            );
        }

        try_join_all(plan.exchanges.iter().map(|exchange| async move {
            channel
                .assert_exchange(exchange, RESOURCE_POLICY)
                .await
                .map_err(|e| StreamError::topology(exchange, e))
        }))
        .await?;

        try_join_all(plan.queues.iter().map(|queue| async move {
            channel
                .assert_queue(&queue.name, RESOURCE_POLICY)
                .await
                .map_err(|e| StreamError::topology(&queue.name, e))
        }))
        .await?;

        try_join_all(plan.binds.iter().map(|bind| async move {
            channel
                .bind_queue(&bind.queue, &bind.exchange, &bind.topic)
                .await
                .map_err(|e| {
                    StreamError::topology(format!("{} -> {}", bind.exchange, bind.queue), e)
                })
        }))
        .await?;

        try_join_all(plan.queues.iter().map(|queue| async move {
            let consumer = ManualAckConsumer::new(&queue.name, queue.dispatch.clone());
            channel
                .consume(&queue.name, Arc::new(consumer), ConsumeOptions::manual_ack())
                .await
                .map_err(|e| StreamError::consume(&queue.name, e))
        }))
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;
