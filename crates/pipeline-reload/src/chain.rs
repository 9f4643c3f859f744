//! An ordered, wired sequence of stages from entry point to sink.
//!
//! Chains are immutable once built: reconfiguration never edits a chain in
//! place, it builds a replacement and swaps it in at the binding level. The
//! builder walks the descriptor sequence tail to head, threading the "next"
//! consumer handle through the loop so each stage is created already wired to
//! its downstream neighbor, with the pipeline sink at the end of the line.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ChainError;
use crate::stage::{Consumer, Stage, StageDescriptor, StageRegistry};

struct ChainStage<T: Send + 'static> {
    /// Descriptor name, kept for error attribution and logging.
    name: String,
    stage: Arc<dyn Stage<T>>,
}

/// A fully wired processing chain. The entry point is stage 0; data flows
/// stage-to-stage to the sink without ever touching the manager.
pub struct Chain<T: Send + 'static> {
    stages: Vec<ChainStage<T>>,
    mutates_data: bool,
}

impl<T: Send + 'static> Chain<T> {
    /// Build a chain from an ordered descriptor sequence.
    ///
    /// All stage types are resolved against the registry before any stage is
    /// constructed, so an unknown type fails the build with no stages created.
    /// A factory failure aborts the whole build; nothing partially wired is
    /// returned. Building reads the registry and nothing else; the caller
    /// decides whether and when to adopt the result.
    pub fn build(
        descriptors: &[StageDescriptor],
        registry: &StageRegistry<T>,
        sink: Arc<dyn Consumer<T>>,
    ) -> Result<Self, ChainError> {
        if descriptors.is_empty() {
            return Err(ChainError::EmptyPipeline);
        }

        let mut factories = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let factory = registry.get(&descriptor.stage_type).ok_or_else(|| {
                ChainError::UnknownStageType {
                    stage: descriptor.name.clone(),
                    stage_type: descriptor.stage_type.clone(),
                }
            })?;
            factories.push(factory);
        }

        // Tail to head: each stage is handed the already-built downstream
        // consumer, starting from the sink.
        let mut stages = Vec::with_capacity(descriptors.len());
        let mut next: Arc<dyn Consumer<T>> = sink;
        for (descriptor, factory) in descriptors.iter().zip(factories).rev() {
            let stage = factory
                .create(&descriptor.config, Arc::clone(&next))
                .map_err(|source| ChainError::StageConstruction {
                    stage: descriptor.name.clone(),
                    source,
                })?;
            let consumer: Arc<dyn Consumer<T>> = stage.clone();
            next = consumer;
            stages.push(ChainStage {
                name: descriptor.name.clone(),
                stage,
            });
        }
        stages.reverse();

        let mutates_data = stages.iter().any(|entry| entry.stage.mutates_data());

        Ok(Self {
            stages,
            mutates_data,
        })
    }

    /// Feed one batch into the chain's entry point.
    ///
    /// Propagation is synchronous and depth-first; a failing stage aborts the
    /// pass and the error surfaces here untouched.
    pub async fn consume(&self, batch: T) -> Result<(), ChainError> {
        // Non-empty by construction.
        self.stages[0].stage.consume(batch).await
    }

    /// Start all stages, last to first, so every stage's downstream neighbor
    /// is ready before the stage itself might forward to it. Aborts on the
    /// first failure without starting the remaining stages.
    pub async fn start(&self, token: &CancellationToken) -> Result<(), ChainError> {
        for entry in self.stages.iter().rev() {
            entry
                .stage
                .start(token)
                .await
                .map_err(|source| ChainError::StageStart {
                    stage: entry.name.clone(),
                    source,
                })?;
        }
        debug!(stages = self.stages.len(), "chain started");
        Ok(())
    }

    /// Shut down all stages, first to last, stopping producers before their
    /// consumers. Aborts on the first failure without stopping the rest.
    pub async fn shutdown(&self, token: &CancellationToken) -> Result<(), ChainError> {
        for entry in &self.stages {
            entry
                .stage
                .shutdown(token)
                .await
                .map_err(|source| ChainError::StageShutdown {
                    stage: entry.name.clone(),
                    source,
                })?;
        }
        debug!(stages = self.stages.len(), "chain shut down");
        Ok(())
    }

    /// Whether any stage in the chain may modify the batches it forwards.
    /// Computed once at build time.
    pub fn mutates_data(&self) -> bool {
        self.mutates_data
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in forwarding order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|entry| entry.name.as_str())
    }
}

impl<T: Send + 'static> std::fmt::Debug for Chain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.stage_names().collect::<Vec<_>>())
            .field("mutates_data", &self.mutates_data)
            .finish()
    }
}
