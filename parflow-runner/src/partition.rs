//! Splitting a tree's leaves into units of work.
//!
//! Leaves are taken in tree order and cut into contiguous groups whose sizes
//! differ by at most one; the first `n % p` groups get the extra leaf. Each
//! group is identified only by its leaves' full keys, so it can be written to
//! a keys file and resolved against an independently rebuilt tree.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use parflow_core::node::{NodeId, Tree};

use crate::error::EngineError;

/// One disjoint group of leaves executed by one worker or task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfWork {
    /// Partition index; also the index map outputs are stored under.
    pub index: usize,
    /// Full keys of the owned leaves, in tree order.
    pub leaf_keys: Vec<String>,
}

impl UnitOfWork {
    /// Resolve the leaf keys against `tree`.
    pub fn resolve(&self, tree: &Tree) -> Result<Vec<NodeId>, EngineError> {
        self.leaf_keys
            .iter()
            .map(|key| tree.require(key).map_err(EngineError::from))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.leaf_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_keys.is_empty()
    }
}

/// Cut `keys` into at most `num_partitions` contiguous, balanced groups.
///
/// Never produces an empty group: with fewer keys than partitions, one group
/// per key is returned.
pub fn split_keys(keys: &[String], num_partitions: usize) -> Result<Vec<UnitOfWork>, EngineError> {
    if num_partitions == 0 {
        return Err(EngineError::InvalidPartitionCount(num_partitions));
    }
    let p = num_partitions.min(keys.len());
    if p == 0 {
        return Ok(Vec::new());
    }
    let (base, extra) = (keys.len() / p, keys.len() % p);
    let mut start = 0;
    Ok((0..p)
        .map(|index| {
            let size = base + usize::from(index < extra);
            let unit = UnitOfWork {
                index,
                leaf_keys: keys[start..start + size].to_vec(),
            };
            start += size;
            unit
        })
        .collect())
}

/// Partition the leaves of `tree`.
pub fn split(tree: &Tree, num_partitions: usize) -> Result<Vec<UnitOfWork>, EngineError> {
    split_keys(&tree.leaf_keys(), num_partitions)
}

// ─── Keys files ──────────────────────────────────────────────────────

pub fn keys_file_name(index: usize) -> String {
    format!("keys_{index}.json")
}

/// Write `unit` to `<dir>/keys_<index>.json`, returning the path.
pub fn write_keys_file(dir: &Path, unit: &UnitOfWork) -> Result<PathBuf, EngineError> {
    fs::create_dir_all(dir).map_err(EngineError::io(dir))?;
    let path = dir.join(keys_file_name(unit.index));
    let json = serde_json::to_vec_pretty(unit).map_err(EngineError::json(&path))?;
    fs::write(&path, json).map_err(EngineError::io(&path))?;
    Ok(path)
}

pub fn read_keys_file(path: &Path) -> Result<UnitOfWork, EngineError> {
    let bytes = fs::read(path).map_err(EngineError::io(path))?;
    serde_json::from_slice(&bytes).map_err(EngineError::json(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parflow_core::estimators::SignClassifier;
    use parflow_core::splitter::{CvConfig, CvKind};
    use parflow_core::Workflow;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("R/leaf{i}")).collect()
    }

    #[test]
    fn seven_leaves_three_partitions() {
        let units = split_keys(&keys(7), 3).unwrap();
        let sizes: Vec<usize> = units.iter().map(UnitOfWork::len).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(units[0].leaf_keys[0], "R/leaf0");
        assert_eq!(units[2].leaf_keys[1], "R/leaf6");
    }

    #[test]
    fn more_partitions_than_leaves() {
        let units = split_keys(&keys(2), 5).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().all(|u| u.len() == 1));
    }

    #[test]
    fn zero_partitions_is_an_error() {
        assert!(matches!(
            split_keys(&keys(3), 0),
            Err(EngineError::InvalidPartitionCount(0))
        ));
    }

    #[test]
    fn units_resolve_against_the_tree() {
        let wf = Workflow::cv(Workflow::estimator(SignClassifier::default()), CvConfig::new(5, CvKind::Random));
        let tree = Tree::build(&wf).unwrap();
        let units = split(&tree, 2).unwrap();
        let resolved: Vec<NodeId> = units.iter().flat_map(|u| u.resolve(&tree).unwrap()).collect();
        assert_eq!(resolved, tree.get_leaves(tree.root()));

        let bogus = UnitOfWork {
            index: 0,
            leaf_keys: vec!["CV/nope".into()],
        };
        assert!(bogus.resolve(&tree).is_err());
    }

    #[test]
    fn keys_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let unit = UnitOfWork {
            index: 4,
            leaf_keys: keys(3),
        };
        let path = write_keys_file(dir.path(), &unit).unwrap();
        assert!(path.ends_with("keys_4.json"));
        assert_eq!(read_keys_file(&path).unwrap(), unit);
    }

    proptest! {
        #[test]
        fn split_is_balanced_and_disjoint(n in 0usize..200, p in 1usize..20) {
            let all = keys(n);
            let units = split_keys(&all, p).unwrap();
            prop_assert_eq!(units.len(), p.min(n));
            let sizes: Vec<usize> = units.iter().map(UnitOfWork::len).collect();
            if let (Some(max), Some(min)) = (sizes.iter().max(), sizes.iter().min()) {
                prop_assert!(max - min <= 1);
                prop_assert!(*min >= 1);
            }
            let flattened: Vec<String> = units.into_iter().flat_map(|u| u.leaf_keys).collect();
            prop_assert_eq!(flattened, all);
        }
    }
}
