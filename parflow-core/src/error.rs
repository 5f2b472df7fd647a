//! Errors raised while building and running execution trees.

use thiserror::Error;

use crate::estimator::EstimatorError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Siblings still share a full key after signature refinement.
    #[error("ambiguous workflow: {0}")]
    AmbiguousWorkflow(String),

    #[error("slicer {key} has no slices; its splitter must run before {op}")]
    UninitializedSlicer { key: String, op: String },

    #[error("slicer {key} holds sample sets {available:?}; pick one")]
    AmbiguousSampleSet { key: String, available: Vec<String> },

    #[error("slicer {key} has no sample set '{sample_set}'")]
    UnknownSampleSet { key: String, sample_set: String },

    #[error("{key} needs payload block '{block}'")]
    MissingBlock { key: String, block: String },

    #[error("{key} computed {computed} partitions for {children} children")]
    FoldCountMismatch {
        key: String,
        computed: usize,
        children: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("estimator at {key} failed: {source}")]
    Estimator {
        key: String,
        #[source]
        source: EstimatorError,
    },

    #[error("no node with key {0}")]
    UnknownKey(String),

    /// Recursion starts at the root or at a leaf; an inner node would skip
    /// its ancestors' operations.
    #[error("cannot {op} recursively from inner node {key}")]
    RecursionFromInnerNode { key: String, op: String },

    #[error("{key}: block '{block}' has {found} rows, expected {expected}")]
    ShapeMismatch {
        key: String,
        block: String,
        found: usize,
        expected: usize,
    },
}
