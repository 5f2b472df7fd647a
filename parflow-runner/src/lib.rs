//! ParFlow Runner — map-reduce scheduling over `parflow-core` trees.
//!
//! This crate builds on `parflow-core` to provide:
//! - Leaf partitioning into units of work, with keys files
//! - Per-partition execution (the map phase) and a stand-alone mapper
//! - The local engine: a worker pool followed by one reduce on the driver
//! - The reduce phase over a shared store, with a results artifact
//! - Task-graph export for external schedulers
//! - CSV dataset directories and TOML engine configuration

pub mod config;
pub mod dataset;
pub mod error;
pub mod export;
pub mod local;
pub mod partition;
pub mod reducer;
pub mod worker;

pub use config::{ConfigError, EngineConfig, StoreConfig};
pub use dataset::{load_dataset, save_dataset, DatasetError};
pub use error::EngineError;
pub use export::{export, ExportPaths, ExportReport, Task, TaskGraph};
pub use local::{LocalEngine, LocalRun};
pub use partition::{read_keys_file, split, split_keys, write_keys_file, UnitOfWork};
pub use reducer::{read_results, reduce_phase, write_results, ResultsArtifact, RunManifest};
pub use worker::{run_mapper, run_partition, PartitionReport};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<EngineConfig>();
        assert_sync::<EngineConfig>();
        assert_send::<StoreConfig>();
        assert_sync::<StoreConfig>();
    }

    #[test]
    fn units_and_reports_are_send_sync() {
        assert_send::<UnitOfWork>();
        assert_sync::<UnitOfWork>();
        assert_send::<PartitionReport>();
        assert_sync::<PartitionReport>();
        assert_send::<ResultsArtifact>();
        assert_sync::<ResultsArtifact>();
    }

    #[test]
    fn engine_error_is_send_sync() {
        assert_send::<EngineError>();
        assert_sync::<EngineError>();
    }

    #[test]
    fn local_engine_is_send_sync() {
        assert_send::<LocalEngine>();
        assert_sync::<LocalEngine>();
    }
}
