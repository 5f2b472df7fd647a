//! Property tests for tree invariants.
//!
//! Uses proptest to verify:
//! 1. Leaf count equals the product of fan-outs, and leaf order is stable
//! 2. Every leaf has a distinct full key, and so does every node when
//!    pipelines share their pre-processing
//! 3. Random folds partition the row set
//! 4. Aggregation over permutations keeps permutation order

use std::collections::BTreeSet;

use parflow_core::estimators::{SelectKBest, SignClassifier};
use parflow_core::node::PRED;
use parflow_core::splitter::{create_folds, CvConfig, CvKind, PermConfig};
use parflow_core::{aggregate, KeyLevel, OutputValue, Tree, Workflow};
use proptest::prelude::*;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_thresholds() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::btree_set(-20..20i32, 1..5).prop_map(|s| s.into_iter().collect())
}

fn nested(n_perms: usize, n_folds: usize, thresholds: &[i32]) -> Workflow {
    let methods = Workflow::methods(
        thresholds
            .iter()
            .map(|&t| Workflow::estimator(SignClassifier::new(f64::from(t)))),
    );
    Workflow::perms(
        Workflow::cv(methods, CvConfig::new(n_folds, CvKind::Random)),
        PermConfig::new(n_perms),
    )
}

fn shared_preprocessing(thresholds: &[i32]) -> Workflow {
    Workflow::cv(
        Workflow::methods(thresholds.iter().map(|&t| {
            Workflow::pipe([
                Workflow::estimator(SelectKBest::new(1)),
                Workflow::estimator(SignClassifier::new(f64::from(t))),
            ])
        })),
        CvConfig::new(2, CvKind::Random),
    )
}

// ── 1–2. Shape and addressing ────────────────────────────────────────

proptest! {
    #[test]
    fn leaf_count_is_product_of_fan_outs(
        n_perms in 1usize..5,
        n_folds in 2usize..5,
        thresholds in arb_thresholds(),
    ) {
        let tree = Tree::build(&nested(n_perms, n_folds, &thresholds)).unwrap();
        let leaves = tree.get_leaves(tree.root());
        prop_assert_eq!(leaves.len(), n_perms * n_folds * thresholds.len());
        prop_assert_eq!(leaves, tree.get_leaves(tree.root()));
    }

    #[test]
    fn full_leaf_keys_are_unique(
        n_perms in 1usize..4,
        n_folds in 2usize..4,
        thresholds in arb_thresholds(),
    ) {
        let tree = Tree::build(&nested(n_perms, n_folds, &thresholds)).unwrap();
        let keys = tree.leaf_keys();
        let distinct: BTreeSet<&String> = keys.iter().collect();
        prop_assert_eq!(distinct.len(), keys.len());
        for key in &keys {
            prop_assert_eq!(tree.node_by_key(key).map(|id| tree.get_key(id, KeyLevel::Full)), Some(key.clone()));
        }
    }

    #[test]
    fn every_node_key_is_unique(thresholds in arb_thresholds()) {
        let tree = Tree::build(&shared_preprocessing(&thresholds)).unwrap();
        let ids: Vec<_> = tree.walk_nodes(tree.root()).collect();
        let keys: BTreeSet<String> = ids.iter().map(|&id| tree.get_key(id, KeyLevel::Full)).collect();
        prop_assert_eq!(keys.len(), ids.len());
        for &id in &ids {
            prop_assert_eq!(tree.node_by_key(&tree.get_key(id, KeyLevel::Full)), Some(id));
        }
    }

    // ── 3. Folds ─────────────────────────────────────────────────────

    #[test]
    fn random_folds_partition_rows(n in 2usize..60, k in 2usize..8, seed in any::<u64>()) {
        prop_assume!(k <= n);
        let config = CvConfig { seed, ..CvConfig::new(k, CvKind::Random) };
        let folds = create_folds(n, &config, None).unwrap();
        let mut seen = vec![0usize; n];
        for fold in &folds {
            let train: BTreeSet<usize> = fold.train.iter().copied().collect();
            prop_assert!(fold.test.iter().all(|i| !train.contains(i)));
            prop_assert_eq!(fold.train.len() + fold.test.len(), n);
            fold.test.iter().for_each(|&i| seen[i] += 1);
        }
        prop_assert!(seen.iter().all(|&c| c == 1));
    }

    // ── 4. Aggregation order ─────────────────────────────────────────

    #[test]
    fn permutation_aggregate_is_in_permutation_order(n_perms in 1usize..12) {
        let wf = Workflow::perms(Workflow::estimator(SignClassifier::default()), PermConfig::new(n_perms));
        let mut tree = Tree::build(&wf).unwrap();
        for (i, leaf) in tree.get_leaves(tree.root()).into_iter().enumerate() {
            tree.add_map_output(leaf, PRED, i as f64);
        }
        let agg = aggregate(&tree, tree.root()).unwrap();
        let order: Vec<f64> = agg[PRED].flatten_numbers();
        prop_assert_eq!(order, (0..n_perms).map(|i| i as f64).collect::<Vec<_>>());
        prop_assert!(matches!(&agg[PRED], OutputValue::Collection(items) if items.len() == n_perms));
    }
}
