//! Local engine: a fixed-size worker pool over the units of work, then one
//! reduce on the driver.
//!
//! Every worker clones the tree it is handed and executes only its own
//! paths; workers share nothing but the store. The driver blocks until the
//! whole pool is done, then reloads the tree from the store the same way
//! the distributed reducer does.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, instrument};

use parflow_core::store::{save_tree, Store};
use parflow_core::{DataFlow, KeyLevel, Registry, Tree};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::partition::{split, UnitOfWork};
use crate::reducer::{reduce_phase, ResultsArtifact};
use crate::worker::{run_partition, PartitionReport};

/// Outcome of a local run.
#[derive(Debug)]
pub struct LocalRun {
    /// The tree reloaded from the store: fitted estimators, slices and
    /// every partition's outputs.
    pub tree: Tree,
    pub artifact: ResultsArtifact,
    pub reports: Vec<PartitionReport>,
}

#[derive(Clone)]
pub struct LocalEngine {
    config: EngineConfig,
    registry: Arc<Registry>,
}

impl LocalEngine {
    /// Engine reloading trees through the built-in registry.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_registry(config, Registry::with_builtins())
    }

    pub fn with_registry(config: EngineConfig, registry: Registry) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Map every unit of work on the pool, then reload and reduce.
    #[instrument(skip_all, fields(partitions = self.config.num_partitions, workers = self.config.num_workers))]
    pub fn run(&self, tree: &Tree, data: &DataFlow, store: &dyn Store) -> Result<LocalRun, EngineError> {
        let units = split(tree, self.config.num_partitions)?;
        if self.config.store.clear {
            store.clear()?;
        }
        let mut driver = tree.clone();
        driver.clear_map_outputs();
        save_tree(&driver, store)?;

        let reports = self.map(&driver, &units, data, store)?;
        info!(units = reports.len(), "map phase complete");

        let root_key = driver.get_key(driver.root(), KeyLevel::Full);
        let (tree, artifact) = reduce_phase(store, &self.registry, Some(&root_key))?;
        info!(groups = artifact.results.len(), "reduce phase complete");
        Ok(LocalRun {
            tree,
            artifact,
            reports,
        })
    }

    fn map(
        &self,
        tree: &Tree,
        units: &[UnitOfWork],
        data: &DataFlow,
        store: &dyn Store,
    ) -> Result<Vec<PartitionReport>, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_workers)
            .build()
            .map_err(|e| EngineError::ThreadPool(e.to_string()))?;
        let ops = &self.config.ops;
        pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    let mut own = tree.clone();
                    run_partition(&mut own, unit, data, ops, store)
                })
                .collect()
        })
    }
}
