//! ParFlow Core — execution trees over a shared data flow.
//!
//! This crate contains the tree engine itself:
//! - Keys and signatures addressing every node, at full and collapsed level
//! - The node arena with top-down fit / transform / predict
//! - Splitters (cross-validation, permutations, methods, grid) and the row
//!   slicers they drive
//! - Bottom-up aggregation and per-splitter reducers
//! - Stores (in-memory and filesystem) and tree persistence
//! - A type-tag registry and a handful of built-in estimators

pub mod data;
pub mod error;
pub mod estimator;
pub mod estimators;
pub mod key;
pub mod node;
pub mod output;
pub mod reduce;
pub mod registry;
pub mod rng;
pub mod slicer;
pub mod splitter;
pub mod store;
pub mod workflow;

pub use data::{Block, DataFlow, Matrix};
pub use error::WorkflowError;
pub use key::KeyLevel;
pub use node::{Node, NodeId, Op, Tree};
pub use output::{OutputMap, OutputValue};
pub use reduce::{aggregate, reduce, ResultSet};
pub use registry::Registry;
pub use store::{FsStore, MemStore, Store, StoreError};
pub use workflow::Workflow;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: trees and stores can move to worker threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Tree>();
        require_sync::<Tree>();
        require_send::<DataFlow>();
        require_sync::<DataFlow>();
        require_send::<ResultSet>();
        require_sync::<ResultSet>();
        require_send::<Registry>();
        require_sync::<Registry>();
        require_send::<MemStore>();
        require_sync::<MemStore>();
        require_send::<FsStore>();
        require_sync::<FsStore>();
        require_send::<Box<dyn Store>>();
        require_sync::<Box<dyn Store>>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
    }
}
