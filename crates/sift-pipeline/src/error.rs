//! Error taxonomy for reconciliation and curation runs.

use sift_adapters::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal before any processing starts (missing credential, no queries, ...).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A collaborator call failed in a way the run cannot absorb.
    #[error("{call} failed: {source}")]
    Collaborator {
        call: String,
        #[source]
        source: AdapterError,
    },

    /// A tabular source cannot be reconciled as delivered.
    #[error("source `{source_id}` cannot be reconciled: {message}")]
    InputShape { source_id: String, message: String },

    /// Rule data failed to load or validate.
    #[error("rules error in {origin}: {message}")]
    Rules { origin: String, message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn rules(origin: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Rules {
            origin: origin.into(),
            message: msg.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config { .. })
    }
}

/// True when any error in the chain is a configuration error.
pub fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<PipelineError>())
        .any(PipelineError::is_config)
}
