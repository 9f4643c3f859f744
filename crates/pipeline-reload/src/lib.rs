//! # Pipeline Reload
//!
//! This crate provides hot-swappable processing chains for telemetry
//! pipelines: an ordered sequence of transform stages can be rebuilt from new
//! configuration and atomically substituted for the running chain without
//! stopping data flow or losing in-flight work.
//!
//! ## Features
//!
//! - Generic `Stage<T>`/`Consumer<T>` capability traits for any batch type
//! - `Chain<T>` built tail-to-head from stage descriptors and a factory
//!   registry, wired stage-to-stage down to the pipeline sink
//! - `PipelineBinding<T>` with an atomic hot-swap protocol: the new chain is
//!   started before it becomes reachable, the old chain is retired on a
//!   background task
//! - `ChainManager<T>` owning all bindings and applying configuration
//!   updates from a single inbound channel, strictly in order
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pipeline_reload::{ChainManager, LogStage, StageDescriptor, StageRegistry};
//! # use pipeline_reload::{ChainError, Consumer};
//! # struct Sink;
//! # #[async_trait::async_trait]
//! # impl Consumer<Vec<u8>> for Sink {
//! #     async fn consume(&self, _batch: Vec<u8>) -> Result<(), ChainError> { Ok(()) }
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry: StageRegistry<Vec<u8>> =
//!     StageRegistry::new().with_factory("log", Arc::new(LogStage::<Vec<u8>>::factory));
//!
//! let (manager, update_tx) = ChainManager::new(registry);
//! let binding = manager
//!     .register_pipeline(
//!         "traces",
//!         vec![StageDescriptor::new("head", "log")],
//!         Arc::new(Sink),
//!     )
//!     .await?;
//!
//! binding.consume(vec![1, 2, 3]).await?;
//!
//! // Reconfigure stage "head" live; the chain is rebuilt and swapped in.
//! update_tx
//!     .send([("head".into(), serde_json::json!({ "phrase": "updated" }))].into())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod chain;
pub mod error;
pub mod manager;
pub mod stage;
pub mod stages;
#[cfg(test)]
mod test_utils;

pub use binding::PipelineBinding;
pub use chain::Chain;
pub use error::{BoxError, ChainError, UpdateError};
pub use manager::ChainManager;
pub use stage::{
    ConfigUpdate, Consumer, Stage, StageConfig, StageDescriptor, StageFactory, StageRegistry,
};
pub use stages::{LogStage, LogStageConfig};
