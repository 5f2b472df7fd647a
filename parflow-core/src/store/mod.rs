//! Stores: pluggable persistence of node descriptors and map outputs.
//!
//! A store is addressed by full (level-1) node keys. Each key holds at most
//! one node descriptor ([`NodeRecord`]) and any number of map-output
//! objects, one per partition that wrote to it.
//!
//! - [`MemStore`]: in-process maps, for tests and single-process runs.
//! - [`FsStore`]: one directory per key under a root directory.

mod fs;
mod mem;
mod persist;
mod record;

pub use fs::{FsStore, RetryPolicy, StoreLayout};
pub use mem::MemStore;
pub use persist::{load_tree, merge_outputs, save_partition, save_tree};
pub use record::{KindRecord, NodeRecord, TaggedState};

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::estimator::EstimatorError;
use crate::output::OutputMap;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Two writers produced the same output key for one node.
    #[error("merge conflict at {key}: output '{output}' written by {first} and {second}")]
    MergeConflict {
        key: String,
        output: String,
        first: String,
        second: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected file '{name}' under {key}")]
    UnknownExtension { key: String, name: String },

    #[error("nothing stored at {0}")]
    Missing(String),

    /// A write is still in flight under this key.
    #[error("incomplete write under {0}")]
    Incomplete(String),

    #[error("corrupt object at {location}: {detail}")]
    Corrupt { location: String, detail: String },

    #[error("cannot encode state of {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: EstimatorError,
    },

    #[error("no registered {kind} '{tag}'")]
    Registry { kind: &'static str, tag: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Errors that may clear up once concurrent writers finish.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io { .. } | StoreError::Missing(_) | StoreError::Incomplete(_)
        )
    }

    pub(crate) fn corrupt(location: impl fmt::Display, detail: impl fmt::Display) -> Self {
        StoreError::Corrupt {
            location: location.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Persistence backend.
///
/// Implementations must be safe to share across worker threads: workers
/// write disjoint leaf keys concurrently.
pub trait Store: fmt::Debug + Send + Sync {
    fn save_node(&self, key: &str, record: &NodeRecord) -> Result<(), StoreError>;

    fn load_node(&self, key: &str) -> Result<NodeRecord, StoreError>;

    /// Write the map outputs `partition` produced for `key`. Rewriting the
    /// same `(key, partition)` replaces the previous object.
    fn save_outputs(&self, key: &str, partition: usize, outputs: &OutputMap) -> Result<(), StoreError>;

    /// Every output object stored under `key`, in partition order.
    fn load_outputs(&self, key: &str) -> Result<Vec<(usize, OutputMap)>, StoreError>;

    /// Keys of the stored root nodes.
    fn root_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Drop everything.
    fn clear(&self) -> Result<(), StoreError>;
}
