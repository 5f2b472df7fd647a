//! Saving trees to a store and rebuilding them.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, instrument};

use super::{NodeRecord, Store, StoreError};
use crate::key::{self, KeyLevel};
use crate::node::{NodeId, Tree};
use crate::registry::Registry;

/// Write every node descriptor of `tree`, plus any map outputs already held
/// in memory (as partition 0).
#[instrument(skip_all, fields(nodes = tree.len()))]
pub fn save_tree(tree: &Tree, store: &dyn Store) -> Result<(), StoreError> {
    for id in tree.walk_nodes(tree.root()) {
        let key = tree.get_key(id, KeyLevel::Full);
        store.save_node(&key, &NodeRecord::from_node(tree, id)?)?;
        let outputs = tree.node(id).map_outputs();
        if !outputs.is_empty() {
            store.save_outputs(&key, 0, outputs)?;
        }
    }
    Ok(())
}

/// Persist the state one unit of work produced: the descriptors of every
/// node on the paths to `leaves`, and the leaves' map outputs under
/// `partition`.
///
/// Ancestors shared with other partitions are rewritten with the same
/// content, since every worker recomputes them identically.
#[instrument(skip(tree, store, leaves), fields(leaves = leaves.len()))]
pub fn save_partition(
    tree: &Tree,
    store: &dyn Store,
    partition: usize,
    leaves: &[NodeId],
) -> Result<(), StoreError> {
    let on_path: BTreeSet<NodeId> = leaves
        .iter()
        .flat_map(|&leaf| tree.get_path_from_root(leaf))
        .collect();
    for id in on_path {
        let key = tree.get_key(id, KeyLevel::Full);
        store.save_node(&key, &NodeRecord::from_node(tree, id)?)?;
    }
    for &leaf in leaves {
        let outputs = tree.node(leaf).map_outputs();
        if !outputs.is_empty() {
            store.save_outputs(&tree.get_key(leaf, KeyLevel::Full), partition, outputs)?;
        }
    }
    Ok(())
}

/// Rebuild the tree stored under `root_key`, then merge every stored
/// partition's outputs into it.
#[instrument(skip(store, registry))]
pub fn load_tree(store: &dyn Store, root_key: &str, registry: &Registry) -> Result<Tree, StoreError> {
    let record = store.load_node(root_key)?;
    if record.parent.is_some() {
        return Err(StoreError::corrupt(root_key, "root descriptor names a parent"));
    }
    let mut tree = Tree::new(record.to_node(root_key, registry)?);

    let mut pending = vec![(tree.root(), root_key.to_string(), record.children)];
    while let Some((parent, parent_key, children)) = pending.pop() {
        for signature in children {
            let child_key = key::key_push(&parent_key, &signature);
            let record = store.load_node(&child_key)?;
            let node = record.to_node(&child_key, registry)?;
            if node.signature(KeyLevel::Full) != signature {
                return Err(StoreError::corrupt(
                    &child_key,
                    format!("descriptor signature is {}", node.signature(KeyLevel::Full)),
                ));
            }
            let id = tree.add_child(parent, node);
            pending.push((id, child_key, record.children));
        }
    }
    // Child order is preserved per parent; arena order may differ.
    merge_outputs(&mut tree, store)?;
    info!(nodes = tree.len(), leaves = tree.get_leaves(tree.root()).len(), "tree loaded");
    Ok(tree)
}

/// Merge every stored output object into the matching node of `tree`.
///
/// Partitions own disjoint leaves, so a given output key must come from
/// exactly one source per node (the in-memory tree or one partition);
/// anything else is a [`StoreError::MergeConflict`].
#[instrument(skip_all)]
pub fn merge_outputs(tree: &mut Tree, store: &dyn Store) -> Result<(), StoreError> {
    let ids: Vec<NodeId> = tree.walk_nodes(tree.root()).collect();
    for id in ids {
        let key = tree.get_key(id, KeyLevel::Full);
        let stored = store.load_outputs(&key)?;
        if stored.is_empty() {
            continue;
        }
        let mut origin: BTreeMap<String, String> = tree
            .node(id)
            .map_outputs()
            .keys()
            .map(|k| (k.clone(), "in-memory tree".to_string()))
            .collect();
        for (partition, outputs) in stored {
            let source = format!("partition {partition}");
            for (name, value) in outputs {
                if let Some(first) = origin.get(&name) {
                    return Err(StoreError::MergeConflict {
                        key: key.clone(),
                        output: name,
                        first: first.clone(),
                        second: source,
                    });
                }
                origin.insert(name.clone(), source.clone());
                tree.add_map_output(id, name, value);
            }
        }
        debug!(key = %key, outputs = origin.len(), "merged");
    }
    Ok(())
}
