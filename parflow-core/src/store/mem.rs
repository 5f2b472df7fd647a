//! In-memory store.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{NodeRecord, Store, StoreError};
use crate::key::{self, StoreUrl, KEY_SEP};
use crate::output::OutputMap;

#[derive(Debug, Default)]
struct MemInner {
    nodes: BTreeMap<String, NodeRecord>,
    outputs: BTreeMap<String, BTreeMap<usize, OutputMap>>,
}

/// A process-local store addressed as `mem://<id>`.
#[derive(Debug)]
pub struct MemStore {
    id: String,
    inner: RwLock<MemInner>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    /// A new empty store with a random id.
    pub fn new() -> Self {
        Self {
            id: key::random_id(&mut rand::thread_rng()),
            inner: RwLock::new(MemInner::default()),
        }
    }

    pub fn url(&self) -> StoreUrl {
        StoreUrl::Mem(self.id.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemInner>, StoreError> {
        self.inner.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemInner>, StoreError> {
        self.inner.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Store for MemStore {
    fn save_node(&self, key: &str, record: &NodeRecord) -> Result<(), StoreError> {
        self.write()?.nodes.insert(key.to_string(), record.clone());
        Ok(())
    }

    fn load_node(&self, key: &str) -> Result<NodeRecord, StoreError> {
        self.read()?
            .nodes
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::Missing(key.to_string()))
    }

    fn save_outputs(&self, key: &str, partition: usize, outputs: &OutputMap) -> Result<(), StoreError> {
        self.write()?
            .outputs
            .entry(key.to_string())
            .or_default()
            .insert(partition, outputs.clone());
        Ok(())
    }

    fn load_outputs(&self, key: &str) -> Result<Vec<(usize, OutputMap)>, StoreError> {
        let inner = self.read()?;
        match inner.outputs.get(key) {
            Some(parts) => Ok(parts.iter().map(|(p, o)| (*p, o.clone())).collect()),
            None if inner.nodes.contains_key(key) => Ok(Vec::new()),
            None => Err(StoreError::Missing(key.to_string())),
        }
    }

    fn root_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()?
            .nodes
            .keys()
            .filter(|k| !k.contains(KEY_SEP))
            .cloned()
            .collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        inner.nodes.clear();
        inner.outputs.clear();
        Ok(())
    }
}
