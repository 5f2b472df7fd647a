use std::path::PathBuf;

use thiserror::Error;

use parflow_core::reduce::ReduceError;
use parflow_core::store::StoreError;
use parflow_core::WorkflowError;

use crate::config::ConfigError;
use crate::dataset::DatasetError;

/// Error from any engine phase.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reduce(#[from] ReduceError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot split leaves into {0} partitions")]
    InvalidPartitionCount(usize),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("expected exactly one stored root, found {0:?}")]
    RootKey(Vec<String>),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> EngineError {
        let path = path.into();
        move |source| EngineError::Io { path, source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>) -> impl FnOnce(serde_json::Error) -> EngineError {
        let path = path.into();
        move |source| EngineError::Json { path, source }
    }
}
