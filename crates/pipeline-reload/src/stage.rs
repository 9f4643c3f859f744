//! Stage capability surface and the factory seam the host populates.
//!
//! A stage is one transform unit in a processing chain: it consumes a batch,
//! applies its transform, and forwards the result to the next consumer it was
//! wired to at construction time. The manager never inspects concrete stage
//! types; everything it needs is on the `Stage` trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, ChainError};

/// Opaque per-stage configuration, passed through to the stage factory.
pub type StageConfig = serde_json::Value;

/// One configuration update message: stage name to new opaque config.
///
/// A single message may name stages in several pipelines; names not present
/// in any binding are silently ignored.
pub type ConfigUpdate = HashMap<String, StageConfig>;

/// Anything that can accept a batch: a stage, or a pipeline's terminal sink.
#[async_trait]
pub trait Consumer<T: Send + 'static>: Send + Sync {
    /// Accept one batch. Failures propagate synchronously to the caller;
    /// this layer never retries.
    async fn consume(&self, batch: T) -> Result<(), ChainError>;
}

/// A single transform unit in a chain.
///
/// Lifecycle hooks default to no-ops so trivial stages only implement
/// `consume`. `start`/`shutdown` receive a cancellation token; the chain
/// imposes no deadline of its own.
#[async_trait]
pub trait Stage<T: Send + 'static>: Consumer<T> {
    async fn start(&self, _token: &CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }

    async fn shutdown(&self, _token: &CancellationToken) -> Result<(), BoxError> {
        Ok(())
    }

    /// Whether this stage may modify the batches it forwards.
    fn mutates_data(&self) -> bool {
        false
    }
}

/// Builds one stage from its opaque config, wired to forward to `next`.
pub trait StageFactory<T: Send + 'static>: Send + Sync {
    fn create(
        &self,
        config: &StageConfig,
        next: Arc<dyn Consumer<T>>,
    ) -> Result<Arc<dyn Stage<T>>, BoxError>;
}

impl<T, F> StageFactory<T> for F
where
    T: Send + 'static,
    F: Fn(&StageConfig, Arc<dyn Consumer<T>>) -> Result<Arc<dyn Stage<T>>, BoxError> + Send + Sync,
{
    fn create(
        &self,
        config: &StageConfig,
        next: Arc<dyn Consumer<T>>,
    ) -> Result<Arc<dyn Stage<T>>, BoxError> {
        self(config, next)
    }
}

/// Declares one position in a pipeline; order within the descriptor sequence
/// is execution order. `name` identifies the stage for configuration updates
/// and must be unique within its pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub name: String,
    /// Selects the factory from the registry.
    pub stage_type: String,
    /// Opaque configuration handed to the factory.
    #[serde(default)]
    pub config: StageConfig,
}

impl StageDescriptor {
    pub fn new(name: impl Into<String>, stage_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage_type: stage_type.into(),
            config: StageConfig::Null,
        }
    }

    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }
}

/// Stage-type name to factory map, supplied by the host and only ever read
/// by the chain manager.
pub struct StageRegistry<T: Send + 'static> {
    factories: HashMap<String, Arc<dyn StageFactory<T>>>,
}

impl<T: Send + 'static> StageRegistry<T> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under a stage-type name, replacing any previous
    /// factory for that name.
    pub fn register(
        &mut self,
        stage_type: impl Into<String>,
        factory: Arc<dyn StageFactory<T>>,
    ) {
        self.factories.insert(stage_type.into(), factory);
    }

    /// Builder-style `register` for chaining.
    pub fn with_factory(
        mut self,
        stage_type: impl Into<String>,
        factory: Arc<dyn StageFactory<T>>,
    ) -> Self {
        self.register(stage_type, factory);
        self
    }

    pub fn get(&self, stage_type: &str) -> Option<&Arc<dyn StageFactory<T>>> {
        self.factories.get(stage_type)
    }

    pub fn contains(&self, stage_type: &str) -> bool {
        self.factories.contains_key(stage_type)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl<T: Send + 'static> Default for StageRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
