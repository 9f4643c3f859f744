//! Pipeline binding: the live association between a pipeline identity and
//! its currently active chain.
//!
//! The binding is the swap point of the whole crate. Its single coarse mutex
//! serializes every `consume` call against every other and against chain
//! replacement, so a batch is always processed by exactly one chain
//! generation, never a mix. Retired chains are torn down on detached tasks
//! outside the lock and cannot delay new traffic.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chain::Chain;
use crate::error::ChainError;
use crate::stage::{ConfigUpdate, Consumer, StageDescriptor};

/// One managed pipeline: identity, descriptor bookkeeping, the active chain,
/// and the terminal sink the chain's last stage forwards to.
pub struct PipelineBinding<T: Send + 'static> {
    pipeline_id: String,
    /// Current descriptor sequence; patched in place by configuration
    /// updates and re-read on every rebuild. Never reordered.
    descriptors: parking_lot::Mutex<Vec<StageDescriptor>>,
    sink: Arc<dyn Consumer<T>>,
    /// The active chain, behind the coarse swap lock. Always fully started
    /// once observable here (module invariant, see `replace_chain`).
    active: tokio::sync::Mutex<Arc<Chain<T>>>,
}

impl<T: Send + 'static> PipelineBinding<T> {
    pub(crate) fn new(
        pipeline_id: impl Into<String>,
        descriptors: Vec<StageDescriptor>,
        chain: Chain<T>,
        sink: Arc<dyn Consumer<T>>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            descriptors: parking_lot::Mutex::new(descriptors),
            sink,
            active: tokio::sync::Mutex::new(Arc::new(chain)),
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// Snapshot of the current descriptor sequence.
    pub fn descriptors(&self) -> Vec<StageDescriptor> {
        self.descriptors.lock().clone()
    }

    pub(crate) fn sink(&self) -> Arc<dyn Consumer<T>> {
        Arc::clone(&self.sink)
    }

    /// The currently active chain.
    pub async fn active_chain(&self) -> Arc<Chain<T>> {
        Arc::clone(&*self.active.lock().await)
    }

    /// Feed one batch through the active chain.
    pub async fn consume(&self, batch: T) -> Result<(), ChainError> {
        let chain = self.active.lock().await;
        chain.consume(batch).await
    }

    /// Replace the config of every descriptor whose name appears in the
    /// update. Returns whether anything matched.
    pub(crate) fn apply_config_update(&self, update: &ConfigUpdate) -> bool {
        let mut descriptors = self.descriptors.lock();
        let mut touched = false;
        for descriptor in descriptors.iter_mut() {
            if let Some(config) = update.get(&descriptor.name) {
                descriptor.config = config.clone();
                touched = true;
            }
        }
        touched
    }

    /// Install `new_chain` as the active chain and retire the previous one.
    ///
    /// The new chain is started while the swap lock is still held, so no
    /// consumption can reach it before it is running; once this returns Ok,
    /// every subsequent `consume` is served by the new chain. If start fails
    /// the error is returned and the new chain stays installed, partially
    /// started (see DESIGN.md). The old chain is shut down on a detached
    /// task; its errors are logged and never surface to the caller.
    pub async fn replace_chain(
        &self,
        new_chain: Chain<T>,
        token: &CancellationToken,
    ) -> Result<(), ChainError> {
        let new_chain = Arc::new(new_chain);

        let mut active = self.active.lock().await;
        debug!(pipeline = %self.pipeline_id, stages = new_chain.len(), "replacing active chain");
        let old = std::mem::replace(&mut *active, Arc::clone(&new_chain));
        new_chain.start(token).await?;
        drop(active);

        let pipeline_id = self.pipeline_id.clone();
        let token = token.clone();
        tokio::spawn(async move {
            debug!(pipeline = %pipeline_id, "shutting down retired chain");
            if let Err(error) = old.shutdown(&token).await {
                warn!(pipeline = %pipeline_id, %error, "failed to shut down retired chain");
            }
        });

        Ok(())
    }

    /// Shut down the active chain, holding the swap lock so no batch can
    /// enter a stopping pipeline. The chain stays installed; a binding always
    /// has exactly one active chain.
    pub async fn shutdown(&self, token: &CancellationToken) -> Result<(), ChainError> {
        let chain = self.active.lock().await;
        chain.shutdown(token).await
    }
}

impl<T: Send + 'static> std::fmt::Debug for PipelineBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBinding")
            .field("pipeline_id", &self.pipeline_id)
            .finish_non_exhaustive()
    }
}
