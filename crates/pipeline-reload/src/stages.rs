//! Built-in reference stage.
//!
//! `LogStage` is the smallest useful `Stage` implementation: it logs a
//! configured phrase for every batch and forwards the batch unchanged. It
//! doubles as a template for writing real stages and as a fixture for
//! exercising a full manager/registry setup in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BoxError, ChainError};
use crate::stage::{Consumer, Stage, StageConfig};

/// Configuration for [`LogStage`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogStageConfig {
    /// Phrase logged for every batch passing through.
    #[serde(default)]
    pub phrase: String,
}

/// Pass-through stage that logs its configured phrase for every batch.
///
/// Forwards batches untouched and honestly reports `mutates_data() == false`.
pub struct LogStage<T: Send + 'static> {
    phrase: String,
    next: Arc<dyn Consumer<T>>,
}

impl<T: Send + 'static> LogStage<T> {
    pub fn new(config: LogStageConfig, next: Arc<dyn Consumer<T>>) -> Self {
        Self {
            phrase: config.phrase,
            next,
        }
    }

    /// Factory in the shape the registry expects; register with e.g.
    /// `registry.register("log", Arc::new(LogStage::<T>::factory))`.
    ///
    /// A null/absent config yields the default (empty) phrase.
    pub fn factory(
        config: &StageConfig,
        next: Arc<dyn Consumer<T>>,
    ) -> Result<Arc<dyn Stage<T>>, BoxError> {
        let config = if config.is_null() {
            LogStageConfig::default()
        } else {
            serde_json::from_value(config.clone())?
        };
        Ok(Arc::new(Self::new(config, next)))
    }
}

#[async_trait]
impl<T: Send + 'static> Consumer<T> for LogStage<T> {
    async fn consume(&self, batch: T) -> Result<(), ChainError> {
        info!(phrase = %self.phrase, "forwarding batch");
        self.next.consume(batch).await
    }
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for LogStage<T> {}
