//! Map phase: execute one unit of work and persist what it produced.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use parflow_core::node::{Op, Tree};
use parflow_core::store::{load_tree, save_partition, Store};
use parflow_core::{DataFlow, Registry};

use crate::dataset::load_dataset;
use crate::error::EngineError;
use crate::partition::{read_keys_file, UnitOfWork};
use crate::reducer::single_root;

/// What one partition did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub index: usize,
    pub leaves: usize,
    /// Map outputs written across the partition's leaves.
    pub outputs: usize,
}

/// Run `ops` over the paths to the unit's leaves, then save the partition.
///
/// `tree` must be owned by this worker alone: slicer and estimator state is
/// mutated in place. Only the paths to the unit's leaves are executed.
#[instrument(skip(tree, data, ops, store), fields(index = unit.index, leaves = unit.len()))]
pub fn run_partition(
    tree: &mut Tree,
    unit: &UnitOfWork,
    data: &DataFlow,
    ops: &[Op],
    store: &dyn Store,
) -> Result<PartitionReport, EngineError> {
    let leaves = unit.resolve(tree)?;
    for op in ops {
        tree.run_leaves(op, data.clone(), &leaves)?;
    }
    save_partition(tree, store, unit.index, &leaves)?;

    let outputs = leaves.iter().map(|&l| tree.node(l).map_outputs().len()).sum();
    info!(outputs, "partition done");
    Ok(PartitionReport {
        index: unit.index,
        leaves: leaves.len(),
        outputs,
    })
}

/// Stand-alone mapper: rebuild the stored tree, load the dataset directory
/// and run the partition described by `keys_file`.
#[instrument(skip(store, registry, ops), fields(keys_file = %keys_file.display()))]
pub fn run_mapper(
    datasets: &Path,
    keys_file: &Path,
    store: &dyn Store,
    registry: &Registry,
    ops: &[Op],
) -> Result<PartitionReport, EngineError> {
    let root_key = single_root(store)?;
    let mut tree = load_tree(store, &root_key, registry)?;
    tree.clear_map_outputs();
    let unit = read_keys_file(keys_file)?;
    let data = load_dataset(datasets)?;
    run_partition(&mut tree, &unit, &data, ops, store)
}
