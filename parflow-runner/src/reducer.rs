//! Reduce phase: reload the full tree from the store, reduce it, and write
//! the results artifact.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use parflow_core::reduce::{reduce, ResultSet};
use parflow_core::store::{load_tree, Store};
use parflow_core::{Registry, Tree};

use crate::error::EngineError;

pub const RESULTS_FILE: &str = "results.json";

/// Provenance of one results artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub created_at: DateTime<Utc>,
    pub root_key: String,
    /// Distinct partitions that contributed leaf outputs.
    pub partitions: usize,
    pub leaves: usize,
    pub engine_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsArtifact {
    pub manifest: RunManifest,
    pub results: ResultSet,
}

/// The one root stored in `store`.
pub fn single_root(store: &dyn Store) -> Result<String, EngineError> {
    let mut roots = store.root_keys()?;
    match roots.len() {
        1 => Ok(roots.remove(0)),
        _ => Err(EngineError::RootKey(roots)),
    }
}

/// Reload the tree under `root_key` (or the store's only root) with every
/// partition's outputs merged, and reduce it from the root.
#[instrument(skip(store, registry))]
pub fn reduce_phase(
    store: &dyn Store,
    registry: &Registry,
    root_key: Option<&str>,
) -> Result<(Tree, ResultsArtifact), EngineError> {
    let root_key = match root_key {
        Some(key) => key.to_string(),
        None => single_root(store)?,
    };
    let tree = load_tree(store, &root_key, registry)?;
    let results = reduce(&tree, tree.root())?;

    let leaf_keys = tree.leaf_keys();
    let mut partitions = BTreeSet::new();
    for key in &leaf_keys {
        partitions.extend(store.load_outputs(key)?.into_iter().map(|(p, _)| p));
    }
    let manifest = RunManifest {
        created_at: Utc::now(),
        root_key,
        partitions: partitions.len(),
        leaves: leaf_keys.len(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    info!(groups = results.len(), partitions = manifest.partitions, "reduced");
    Ok((tree, ResultsArtifact { manifest, results }))
}

/// Write `<outdir>/results.json`.
pub fn write_results(outdir: &Path, artifact: &ResultsArtifact) -> Result<PathBuf, EngineError> {
    fs::create_dir_all(outdir).map_err(EngineError::io(outdir))?;
    let path = outdir.join(RESULTS_FILE);
    let json = serde_json::to_vec_pretty(artifact).map_err(EngineError::json(&path))?;
    fs::write(&path, json).map_err(EngineError::io(&path))?;
    Ok(path)
}

pub fn read_results(path: &Path) -> Result<ResultsArtifact, EngineError> {
    let bytes = fs::read(path).map_err(EngineError::io(path))?;
    serde_json::from_slice(&bytes).map_err(EngineError::json(path))
}
