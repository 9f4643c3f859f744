//! Error types for chain construction, lifecycle, and the data path.

use thiserror::Error;

/// Opaque error cause produced by stages, factories, and sinks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common error type for chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("pipeline has no stage descriptors")]
    EmptyPipeline,

    #[error("unknown stage type `{stage_type}` for stage `{stage}`")]
    UnknownStageType { stage: String, stage_type: String },

    #[error("failed to construct stage `{stage}`: {source}")]
    StageConstruction {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to start stage `{stage}`: {source}")]
    StageStart {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to shut down stage `{stage}`: {source}")]
    StageShutdown {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to consume batch: {source}")]
    Consume {
        #[source]
        source: BoxError,
    },
}

impl ChainError {
    /// Wrap an arbitrary stage or sink failure as a data-path error.
    pub fn consume(source: impl Into<BoxError>) -> Self {
        Self::Consume {
            source: source.into(),
        }
    }

    /// The stage name this error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::UnknownStageType { stage, .. }
            | Self::StageConstruction { stage, .. }
            | Self::StageStart { stage, .. }
            | Self::StageShutdown { stage, .. } => Some(stage),
            Self::EmptyPipeline | Self::Consume { .. } => None,
        }
    }
}

/// Aggregate failure report for one configuration update.
///
/// Reload failures are isolated per binding: every entry names the pipeline
/// that stayed on its previous chain and why, while the remaining bindings
/// completed their swap.
#[derive(Debug, Error)]
#[error("configuration update failed for {count} pipeline(s)", count = .failures.len())]
pub struct UpdateError {
    pub failures: Vec<(String, ChainError)>,
}
