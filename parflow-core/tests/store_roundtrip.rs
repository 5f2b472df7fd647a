//! Integration tests for tree persistence.
//!
//! Tests:
//! 1. Methods over 3 leaves, persisted to a filesystem store and reloaded;
//!    identical pre-processing in two branches keeps both subtrees
//! 2. Fitted state and outputs survive the round trip
//! 3. Per-partition saves merge back into one tree
//! 4. Stray files under a key are a hard error

use std::fs;

use parflow_core::data::{Matrix, FEATURES, TARGET};
use parflow_core::estimators::{SelectKBest, SignClassifier};
use parflow_core::node::{PRED, TRUE};
use parflow_core::splitter::{CvConfig, CvKind};
use parflow_core::store::{load_tree, save_partition, save_tree};
use parflow_core::{
    reduce, DataFlow, FsStore, KeyLevel, MemStore, Registry, Store, StoreError, Tree, Workflow,
};
use tempfile::TempDir;

fn payload() -> DataFlow {
    let rows = vec![
        vec![1.0, 2.0],
        vec![2.0, 1.0],
        vec![3.0, 0.5],
        vec![0.5, 0.5],
        vec![-1.0, -2.0],
        vec![-2.0, -1.0],
        vec![-3.0, -0.5],
        vec![-0.5, -0.5],
    ];
    DataFlow::new()
        .with(FEATURES, Matrix::from_rows(rows).unwrap())
        .with(TARGET, vec![1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0])
}

fn methods() -> Workflow {
    Workflow::methods([
        Workflow::estimator(SignClassifier::new(-1.0)),
        Workflow::estimator(SignClassifier::new(0.0)),
        Workflow::estimator(SignClassifier::new(1.0)),
    ])
}

fn all_keys(tree: &Tree) -> Vec<String> {
    let mut keys: Vec<String> = tree
        .walk_nodes(tree.root())
        .map(|id| tree.get_key(id, KeyLevel::Full))
        .collect();
    keys.sort();
    keys
}

// ── 1. Structure ─────────────────────────────────────────────────────

#[test]
fn methods_tree_round_trips_through_filesystem() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::with_defaults(dir.path()).unwrap();
    let tree = Tree::build(&methods()).unwrap();
    save_tree(&tree, &store).unwrap();

    assert!(dir.path().join("Methods/__node__.json").is_file());
    assert!(dir
        .path()
        .join("Methods/SignClassifier(threshold=-1)/__node__.json")
        .is_file());
    assert_eq!(store.root_keys().unwrap(), vec!["Methods".to_string()]);

    let loaded = load_tree(&store, "Methods", &Registry::with_builtins()).unwrap();
    assert_eq!(all_keys(&loaded), all_keys(&tree));
    assert_eq!(loaded.leaf_keys(), tree.leaf_keys());
}

#[test]
fn identical_preprocessing_in_two_branches_keeps_both_subtrees() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::with_defaults(dir.path()).unwrap();
    let mut tree = Tree::build(&Workflow::methods([
        Workflow::pipe([
            Workflow::estimator(SelectKBest::new(2)),
            Workflow::estimator(SignClassifier::new(0.0)),
        ]),
        Workflow::pipe([
            Workflow::estimator(SelectKBest::new(2)),
            Workflow::estimator(SignClassifier::new(2.0)),
        ]),
    ]))
    .unwrap();
    tree.fit(payload()).unwrap();
    save_tree(&tree, &store).unwrap();
    assert!(dir
        .path()
        .join("Methods/SelectKBest(branch=1)/SignClassifier(threshold=2)/__node__.json")
        .is_file());

    let mut loaded = load_tree(&store, "Methods", &Registry::with_builtins()).unwrap();
    assert_eq!(all_keys(&loaded), all_keys(&tree));
    assert_eq!(
        loaded.leaf_keys(),
        vec![
            "Methods/SelectKBest(branch=0)/SignClassifier(threshold=0)".to_string(),
            "Methods/SelectKBest(branch=1)/SignClassifier(threshold=2)".to_string(),
        ]
    );
    for key in tree.leaf_keys() {
        assert!(loaded.node_by_key(&key).is_some(), "{key} unreachable after reload");
    }

    tree.predict(payload()).unwrap();
    loaded.predict(payload()).unwrap();
    for key in tree.leaf_keys() {
        let (a, b) = (tree.node_by_key(&key).unwrap(), loaded.node_by_key(&key).unwrap());
        assert_eq!(tree.node(a).map_outputs()[PRED], loaded.node(b).map_outputs()[PRED]);
    }
}

// ── 2. State and outputs ─────────────────────────────────────────────

#[test]
fn fitted_outputs_survive_reload() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::with_defaults(dir.path()).unwrap();
    let mut tree = Tree::build(&methods()).unwrap();
    tree.fit_predict(payload()).unwrap();
    save_tree(&tree, &store).unwrap();

    let loaded = load_tree(&store, "Methods", &Registry::with_builtins()).unwrap();
    for (a, b) in tree
        .get_leaves(tree.root())
        .into_iter()
        .zip(loaded.get_leaves(loaded.root()))
    {
        let (before, after) = (tree.node(a).map_outputs(), loaded.node(b).map_outputs());
        assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
        assert_eq!(before[PRED], after[PRED]);
        assert_eq!(before[TRUE], after[TRUE]);
    }
    assert_eq!(reduce(&loaded, loaded.root()).unwrap(), reduce(&tree, tree.root()).unwrap());
}

#[test]
fn reloaded_estimators_keep_fitted_state() {
    let store = MemStore::new();
    let mut tree = Tree::build(&methods()).unwrap();
    tree.fit(payload()).unwrap();
    save_tree(&tree, &store).unwrap();

    let mut loaded = load_tree(&store, "Methods", &Registry::with_builtins()).unwrap();
    loaded.predict(payload()).unwrap();
    let leaf = loaded.get_leaves(loaded.root())[1];
    assert_eq!(loaded.node(leaf).map_outputs()[PRED], loaded.node(leaf).map_outputs()[TRUE]);
}

// ── 3. Partitions ────────────────────────────────────────────────────

#[test]
fn partition_saves_merge_back() {
    let store = MemStore::new();
    let wf = Workflow::cv(
        Workflow::estimator(SignClassifier::default()),
        CvConfig::new(4, CvKind::Stratified),
    );
    let driver = Tree::build(&wf).unwrap();
    save_tree(&driver, &store).unwrap();

    let leaves = driver.get_leaves(driver.root());
    for (p, chunk) in leaves.chunks(2).enumerate() {
        let mut worker = driver.clone();
        worker.run_leaves(&parflow_core::Op::Fit, payload(), chunk).unwrap();
        worker.run_leaves(&parflow_core::Op::Predict, payload(), chunk).unwrap();
        save_partition(&worker, &store, p, chunk).unwrap();
    }

    let driver = load_tree(&store, "CV", &Registry::with_builtins()).unwrap();
    for leaf in driver.get_leaves(driver.root()) {
        assert_eq!(driver.node(leaf).map_outputs()[PRED].flatten_numbers().len(), 2);
        let slicer = driver.parent(leaf).unwrap();
        assert!(driver.node(slicer).as_slicer().unwrap().slices().is_some());
    }
}

// ── 4. Hard errors ───────────────────────────────────────────────────

#[test]
fn stray_file_aborts_reload() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::with_defaults(dir.path()).unwrap();
    let tree = Tree::build(&methods()).unwrap();
    save_tree(&tree, &store).unwrap();
    fs::write(dir.path().join("Methods/notes.txt"), "hello").unwrap();

    let err = load_tree(&store, "Methods", &Registry::with_builtins()).unwrap_err();
    assert!(matches!(err, StoreError::UnknownExtension { .. }));
}

#[test]
fn unregistered_estimator_aborts_reload() {
    let store = MemStore::new();
    let tree = Tree::build(&methods()).unwrap();
    save_tree(&tree, &store).unwrap();
    let err = load_tree(&store, "Methods", &Registry::new()).unwrap_err();
    assert!(matches!(err, StoreError::Registry { .. }));
}
