//! Chain manager: owns all pipeline bindings and applies configuration
//! updates arriving on its inbound channel.
//!
//! The manager is created once at service start and lives for the process
//! lifetime. A single long-lived listener task drains the update channel
//! strictly in order; no two updates are ever applied concurrently against
//! the same manager. The data path never touches the manager: once a chain
//! is wired, batches flow stage-to-stage directly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::binding::PipelineBinding;
use crate::chain::Chain;
use crate::error::{ChainError, UpdateError};
use crate::stage::{ConfigUpdate, Consumer, StageDescriptor, StageRegistry};

/// Capacity of the inbound configuration-update channel.
const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Owns the stage factory registry and every pipeline binding; rebuilds and
/// hot-swaps chains when configuration updates arrive.
pub struct ChainManager<T: Send + 'static> {
    /// Factory registry supplied by the host at construction; read-only here.
    registry: StageRegistry<T>,
    bindings: tokio::sync::RwLock<Vec<Arc<PipelineBinding<T>>>>,
    cancellation_token: CancellationToken,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> ChainManager<T> {
    /// Create a manager and spawn its configuration listener.
    ///
    /// Returns the manager together with the sender side of its update
    /// channel; the host delivers every subsequent configuration update
    /// through that sender. Dropping all senders closes the channel and
    /// terminates the listener, as does [`ChainManager::shutdown`].
    pub fn new(registry: StageRegistry<T>) -> (Arc<Self>, mpsc::Sender<ConfigUpdate>) {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        let manager = Arc::new(Self {
            registry,
            bindings: tokio::sync::RwLock::new(Vec::new()),
            cancellation_token: CancellationToken::new(),
            listener: parking_lot::Mutex::new(None),
        });

        let listener = tokio::spawn(Self::listen_for_updates(
            Arc::clone(&manager),
            update_rx,
        ));
        *manager.listener.lock() = Some(listener);

        (manager, update_tx)
    }

    async fn listen_for_updates(manager: Arc<Self>, mut rx: mpsc::Receiver<ConfigUpdate>) {
        loop {
            tokio::select! {
                _ = manager.cancellation_token.cancelled() => {
                    debug!("configuration listener cancelled");
                    break;
                }
                message = rx.recv() => {
                    match message {
                        Some(update) => {
                            debug!(stages = update.len(), "received a configuration update");
                            if let Err(update_error) = manager.apply_update(&update).await {
                                for (pipeline, cause) in &update_error.failures {
                                    error!(%pipeline, error = %cause, "failed to update configuration for pipeline");
                                }
                            }
                        }
                        None => {
                            debug!("update channel closed, stopping configuration listener");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Build, start, and register the initial chain for a pipeline.
    ///
    /// This is the only path that creates a binding. The binding becomes
    /// visible to configuration updates once this returns; the returned
    /// handle is the pipeline's consumption entry point for the host.
    pub async fn register_pipeline(
        &self,
        pipeline_id: impl Into<String>,
        descriptors: Vec<StageDescriptor>,
        sink: Arc<dyn Consumer<T>>,
    ) -> Result<Arc<PipelineBinding<T>>, ChainError> {
        let pipeline_id = pipeline_id.into();

        let chain = Chain::build(&descriptors, &self.registry, Arc::clone(&sink))?;
        chain.start(&self.cancellation_token).await?;

        info!(
            pipeline = %pipeline_id,
            stages = chain.len(),
            mutates_data = chain.mutates_data(),
            "registered pipeline"
        );

        let binding = Arc::new(PipelineBinding::new(pipeline_id, descriptors, chain, sink));
        self.bindings.write().await.push(Arc::clone(&binding));
        Ok(binding)
    }

    /// Apply one configuration update to every binding it names.
    ///
    /// For each binding, descriptors whose name appears in the update get
    /// their config replaced; if anything matched, the whole chain is rebuilt
    /// from the patched descriptor sequence and hot-swapped in. Bindings the
    /// update does not name keep their current chain and stage instances
    /// untouched. Failures are isolated per binding: the failed binding stays
    /// on its previous chain while the others complete, and all failures are
    /// reported together.
    pub async fn apply_update(&self, update: &ConfigUpdate) -> Result<(), UpdateError> {
        let bindings: Vec<_> = self.bindings.read().await.iter().cloned().collect();

        let mut failures = Vec::new();
        for binding in bindings {
            if !binding.apply_config_update(update) {
                continue;
            }

            let descriptors = binding.descriptors();
            let swapped = match Chain::build(&descriptors, &self.registry, binding.sink()) {
                Ok(chain) => binding.replace_chain(chain, &self.cancellation_token).await,
                Err(error) => Err(error),
            };

            match swapped {
                Ok(()) => info!(pipeline = %binding.pipeline_id(), "pipeline reconfigured"),
                Err(error) => {
                    warn!(
                        pipeline = %binding.pipeline_id(),
                        %error,
                        "failed to apply configuration update to pipeline"
                    );
                    failures.push((binding.pipeline_id().to_string(), error));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(UpdateError { failures })
        }
    }

    /// Snapshot of the currently registered bindings.
    pub async fn bindings(&self) -> Vec<Arc<PipelineBinding<T>>> {
        self.bindings.read().await.iter().cloned().collect()
    }

    /// The token governing the listener and all lifecycle calls issued by
    /// this manager.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Stop the listener and shut down every binding's active chain.
    ///
    /// Per-binding shutdown errors are logged and do not abort the teardown
    /// of the remaining bindings.
    pub async fn shutdown(&self) {
        debug!("shutting down chain manager");
        self.cancellation_token.cancel();

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(error) = listener.await {
                warn!(%error, "configuration listener task failed");
            }
        }

        let shutdown_token = CancellationToken::new();
        for binding in self.bindings().await {
            if let Err(error) = binding.shutdown(&shutdown_token).await {
                warn!(
                    pipeline = %binding.pipeline_id(),
                    %error,
                    "failed to shut down pipeline chain"
                );
            }
        }
        debug!("chain manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::stage::{Stage, StageConfig};
    use async_trait::async_trait;
    use std::time::Duration;

    type Batch = Vec<String>;

    struct StampStage {
        stamp: String,
        next: Arc<dyn Consumer<Batch>>,
    }

    #[async_trait]
    impl Consumer<Batch> for StampStage {
        async fn consume(&self, mut batch: Batch) -> Result<(), ChainError> {
            batch.push(self.stamp.clone());
            self.next.consume(batch).await
        }
    }

    #[async_trait]
    impl Stage<Batch> for StampStage {}

    #[derive(Default)]
    struct CollectSink {
        batches: parking_lot::Mutex<Vec<Batch>>,
    }

    impl CollectSink {
        fn last(&self) -> Option<Batch> {
            self.batches.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Consumer<Batch> for CollectSink {
        async fn consume(&self, batch: Batch) -> Result<(), ChainError> {
            self.batches.lock().push(batch);
            Ok(())
        }
    }

    /// "stamp" stages push their configured stamp; a `{"broken": true}`
    /// config makes the factory refuse, for rebuild-failure tests.
    fn registry() -> StageRegistry<Batch> {
        let factory = |config: &StageConfig,
                       next: Arc<dyn Consumer<Batch>>|
              -> Result<Arc<dyn Stage<Batch>>, BoxError> {
            if config["broken"].as_bool().unwrap_or(false) {
                return Err("bad stage config".into());
            }
            Ok(Arc::new(StampStage {
                stamp: config["stamp"].as_str().unwrap_or("?").to_string(),
                next,
            }))
        };
        StageRegistry::new().with_factory("stamp", Arc::new(factory))
    }

    fn stamp_descriptor(name: &str, stamp: &str) -> StageDescriptor {
        StageDescriptor::new(name, "stamp").with_config(serde_json::json!({ "stamp": stamp }))
    }

    #[tokio::test]
    async fn registered_pipeline_consumes_end_to_end() {
        let (manager, _update_tx) = ChainManager::new(registry());
        let sink = Arc::new(CollectSink::default());

        let binding = manager
            .register_pipeline(
                "traces",
                vec![stamp_descriptor("head", "h"), stamp_descriptor("tail", "t")],
                sink.clone(),
            )
            .await
            .unwrap();

        binding.consume(Vec::new()).await.unwrap();
        assert_eq!(sink.last(), Some(vec!["h".to_string(), "t".to_string()]));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn update_rebuilds_named_bindings_and_leaves_others_untouched() {
        let (manager, _update_tx) = ChainManager::new(registry());
        let sink_a = Arc::new(CollectSink::default());
        let sink_b = Arc::new(CollectSink::default());

        let binding_a = manager
            .register_pipeline("a", vec![stamp_descriptor("a-head", "a1")], sink_a.clone())
            .await
            .unwrap();
        let binding_b = manager
            .register_pipeline("b", vec![stamp_descriptor("b-head", "b1")], sink_b.clone())
            .await
            .unwrap();
        let chain_b_before = binding_b.active_chain().await;

        let update: ConfigUpdate = [(
            "a-head".to_string(),
            serde_json::json!({ "stamp": "a2" }),
        )]
        .into_iter()
        .collect();
        manager.apply_update(&update).await.unwrap();

        binding_a.consume(Vec::new()).await.unwrap();
        assert_eq!(sink_a.last(), Some(vec!["a2".to_string()]));

        // Binding B kept the very same chain instance.
        assert!(Arc::ptr_eq(&binding_b.active_chain().await, &chain_b_before));
        binding_b.consume(Vec::new()).await.unwrap();
        assert_eq!(sink_b.last(), Some(vec!["b1".to_string()]));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn update_naming_no_registered_stage_is_a_no_op() {
        let (manager, _update_tx) = ChainManager::new(registry());
        let sink = Arc::new(CollectSink::default());

        let binding = manager
            .register_pipeline("traces", vec![stamp_descriptor("head", "v1")], sink.clone())
            .await
            .unwrap();
        let chain_before = binding.active_chain().await;

        let update: ConfigUpdate = [("absent".to_string(), StageConfig::Null)]
            .into_iter()
            .collect();
        manager.apply_update(&update).await.unwrap();

        assert!(Arc::ptr_eq(&binding.active_chain().await, &chain_before));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn one_update_can_reconfigure_several_pipelines() {
        let (manager, _update_tx) = ChainManager::new(registry());
        let sink_a = Arc::new(CollectSink::default());
        let sink_b = Arc::new(CollectSink::default());

        // Both pipelines contain a stage named "shared".
        let binding_a = manager
            .register_pipeline("a", vec![stamp_descriptor("shared", "old")], sink_a.clone())
            .await
            .unwrap();
        let binding_b = manager
            .register_pipeline("b", vec![stamp_descriptor("shared", "old")], sink_b.clone())
            .await
            .unwrap();

        let update: ConfigUpdate = [(
            "shared".to_string(),
            serde_json::json!({ "stamp": "new" }),
        )]
        .into_iter()
        .collect();
        manager.apply_update(&update).await.unwrap();

        binding_a.consume(Vec::new()).await.unwrap();
        binding_b.consume(Vec::new()).await.unwrap();
        assert_eq!(sink_a.last(), Some(vec!["new".to_string()]));
        assert_eq!(sink_b.last(), Some(vec!["new".to_string()]));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn rebuild_failure_is_isolated_to_its_binding() {
        let (manager, _update_tx) = ChainManager::new(registry());
        let sink_a = Arc::new(CollectSink::default());
        let sink_b = Arc::new(CollectSink::default());

        let binding_a = manager
            .register_pipeline("a", vec![stamp_descriptor("a-head", "a1")], sink_a.clone())
            .await
            .unwrap();
        let binding_b = manager
            .register_pipeline("b", vec![stamp_descriptor("b-head", "b1")], sink_b.clone())
            .await
            .unwrap();

        let update: ConfigUpdate = [
            ("a-head".to_string(), serde_json::json!({ "broken": true })),
            ("b-head".to_string(), serde_json::json!({ "stamp": "b2" })),
        ]
        .into_iter()
        .collect();

        let err = manager.apply_update(&update).await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].0, "a");
        assert!(matches!(
            err.failures[0].1,
            ChainError::StageConstruction { .. }
        ));

        // A stayed on its previous chain; B swapped.
        binding_a.consume(Vec::new()).await.unwrap();
        assert_eq!(sink_a.last(), Some(vec!["a1".to_string()]));
        binding_b.consume(Vec::new()).await.unwrap();
        assert_eq!(sink_b.last(), Some(vec!["b2".to_string()]));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn listener_applies_updates_from_the_channel() {
        crate::test_utils::init_tracing();
        let (manager, update_tx) = ChainManager::new(registry());
        let sink = Arc::new(CollectSink::default());

        let binding = manager
            .register_pipeline("traces", vec![stamp_descriptor("head", "v1")], sink.clone())
            .await
            .unwrap();

        let update: ConfigUpdate = [(
            "head".to_string(),
            serde_json::json!({ "stamp": "v2" }),
        )]
        .into_iter()
        .collect();
        update_tx.send(update).await.unwrap();

        // The listener applies updates asynchronously; poll until the swap
        // becomes visible on the data path.
        let mut swapped = false;
        for _ in 0..100 {
            binding.consume(Vec::new()).await.unwrap();
            if sink.last() == Some(vec!["v2".to_string()]) {
                swapped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(swapped, "listener never applied the update");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn closing_the_update_channel_stops_the_listener() {
        let (manager, update_tx) = ChainManager::new(registry());
        drop(update_tx);

        // The listener exits on channel closure, so shutdown has nothing to
        // wait for and must return promptly.
        tokio::time::timeout(Duration::from_secs(1), manager.shutdown())
            .await
            .expect("shutdown timed out waiting for the listener");
    }
}
