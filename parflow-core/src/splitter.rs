//! Splitters: nodes that fan one payload out into several branches.
//!
//! Cross-validation and permutation splitters own one [`RowSlicer`] child per
//! branch and compute the row partition lazily, when a payload reaches them,
//! because the partition may depend on the labels. Methods and Grid
//! splitters hold user-supplied alternatives and pass the payload through
//! untouched.
//!
//! [`RowSlicer`]: crate::slicer::RowSlicer

use serde::{Deserialize, Serialize};

use crate::data::{Block, DataFlow, FEATURES, TARGET};
use crate::error::WorkflowError;
use crate::key::SignatureArgs;
use crate::reduce::Reducer;
use crate::rng::RngHierarchy;
use crate::slicer::Slices;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvKind {
    /// Each fold keeps the class proportions of the labels.
    Stratified,
    /// Seeded shuffle, then contiguous near-equal chunks.
    Random,
    /// One fold per row.
    LeaveOneOut,
}

impl CvKind {
    fn as_str(self) -> &'static str {
        match self {
            CvKind::Stratified => "stratified",
            CvKind::Random => "random",
            CvKind::LeaveOneOut => "loo",
        }
    }
}

/// Cross-validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvConfig {
    /// Number of folds (default 5).
    pub n_folds: usize,
    /// Partitioning strategy (default stratified).
    pub kind: CvKind,
    /// Master seed for random shuffles.
    pub seed: u64,
    /// Label block used for stratification (default `y`).
    pub target: String,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            n_folds: 5,
            kind: CvKind::Stratified,
            seed: 0,
            target: TARGET.to_string(),
        }
    }
}

impl CvConfig {
    pub fn new(n_folds: usize, kind: CvKind) -> Self {
        Self {
            n_folds,
            kind,
            ..Self::default()
        }
    }
}

/// Permutation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermConfig {
    /// Number of permutations, the identity included (default 100).
    pub n_perms: usize,
    /// Block whose rows are permuted (default `y`).
    pub permute: String,
    /// Master seed.
    pub seed: u64,
}

impl Default for PermConfig {
    fn default() -> Self {
        Self {
            n_perms: 100,
            permute: TARGET.to_string(),
            seed: 0,
        }
    }
}

impl PermConfig {
    pub fn new(n_perms: usize) -> Self {
        Self {
            n_perms,
            ..Self::default()
        }
    }
}

// ─── Fold creation ───────────────────────────────────────────────────

/// One train/test split over row indices. Both lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Fold {
    fn from_test(n: usize, mut test: Vec<usize>) -> Self {
        test.sort_unstable();
        let mut in_test = vec![false; n];
        test.iter().for_each(|&i| in_test[i] = true);
        let train = (0..n).filter(|&i| !in_test[i]).collect();
        Fold { train, test }
    }
}

/// Compute the folds of an `n`-row payload.
///
/// - `Stratified` walks the rows class by class (classes in ascending order)
///   and deals them round-robin over the folds with one running counter, so
///   every fold gets its share of each class.
/// - `Random` shuffles `0..n` with a seeded RNG and cuts it into contiguous
///   chunks; the first `n % k` chunks get one extra row.
/// - `LeaveOneOut` yields `n` folds whatever `n_folds` says; the caller checks
///   the count against its children.
pub fn create_folds(
    n: usize,
    config: &CvConfig,
    labels: Option<&[f64]>,
) -> Result<Vec<Fold>, WorkflowError> {
    if config.kind == CvKind::LeaveOneOut {
        return Ok((0..n).map(|i| Fold::from_test(n, vec![i])).collect());
    }
    let k = config.n_folds;
    if k < 2 || k > n {
        return Err(WorkflowError::InvalidConfig(format!(
            "cannot cut {n} rows into {k} folds"
        )));
    }
    let mut tests: Vec<Vec<usize>> = vec![Vec::new(); k];
    match config.kind {
        CvKind::Stratified => {
            let labels = labels.ok_or_else(|| {
                WorkflowError::InvalidConfig(format!(
                    "stratified folds need the '{}' block",
                    config.target
                ))
            })?;
            let mut classes: Vec<f64> = labels.to_vec();
            classes.sort_by(f64::total_cmp);
            classes.dedup();
            let mut counter = 0usize;
            for class in classes {
                for (i, _) in labels.iter().enumerate().filter(|(_, l)| **l == class) {
                    tests[counter % k].push(i);
                    counter += 1;
                }
            }
        }
        CvKind::Random => {
            let order = RngHierarchy::new(config.seed).shuffled_indices("cv", 0, n);
            let (base, extra) = (n / k, n % k);
            let mut start = 0;
            for (fold, test) in tests.iter_mut().enumerate() {
                let size = base + usize::from(fold < extra);
                test.extend_from_slice(&order[start..start + size]);
                start += size;
            }
        }
        CvKind::LeaveOneOut => {}
    }
    Ok(tests.into_iter().map(|test| Fold::from_test(n, test)).collect())
}

/// `n_perms` row orders of `0..n`; the first is always the identity.
pub fn create_permutations(n: usize, n_perms: usize, seed: u64) -> Vec<Vec<usize>> {
    let rng = RngHierarchy::new(seed);
    (0..n_perms)
        .map(|p| {
            if p == 0 {
                (0..n).collect()
            } else {
                rng.shuffled_indices("perm", p as u64, n)
            }
        })
        .collect()
}

// ─── Splitter nodes ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CrossValidation {
    pub config: CvConfig,
    pub reducer: Option<Box<dyn Reducer>>,
}

#[derive(Debug, Clone)]
pub struct Permutations {
    pub config: PermConfig,
    pub reducer: Option<Box<dyn Reducer>>,
}

/// A fan-out node.
#[derive(Debug, Clone)]
pub enum Splitter {
    CrossValidation(CrossValidation),
    Permutations(Permutations),
    /// Alternatives aggregated only when their keys collide.
    Methods,
    /// Alternatives always aggregated: direct children are wildcarded.
    Grid,
}

impl Splitter {
    pub const CV: &'static str = "CV";
    pub const PERM: &'static str = "Perm";
    pub const METHODS: &'static str = "Methods";
    pub const GRID: &'static str = "Grid";

    pub fn name(&self) -> &'static str {
        match self {
            Splitter::CrossValidation(_) => Self::CV,
            Splitter::Permutations(_) => Self::PERM,
            Splitter::Methods => Self::METHODS,
            Splitter::Grid => Self::GRID,
        }
    }

    /// Constructor arguments, for disambiguation against siblings.
    pub fn state(&self) -> SignatureArgs {
        let mut state = SignatureArgs::new();
        match self {
            Splitter::CrossValidation(cv) => {
                state.insert("n_folds".into(), cv.config.n_folds.to_string());
                state.insert("kind".into(), cv.config.kind.as_str().to_string());
                state.insert("seed".into(), cv.config.seed.to_string());
            }
            Splitter::Permutations(perm) => {
                state.insert("n_perms".into(), perm.config.n_perms.to_string());
                state.insert("permute".into(), perm.config.permute.clone());
                state.insert("seed".into(), perm.config.seed.to_string());
            }
            Splitter::Methods | Splitter::Grid => {}
        }
        state
    }

    pub fn reducer(&self) -> Option<&dyn Reducer> {
        match self {
            Splitter::CrossValidation(cv) => cv.reducer.as_deref(),
            Splitter::Permutations(perm) => perm.reducer.as_deref(),
            Splitter::Methods | Splitter::Grid => None,
        }
    }

    /// Blocks the slicer children re-index; `None` means every matching block.
    pub fn slicer_scope(&self) -> Option<Vec<String>> {
        match self {
            Splitter::Permutations(perm) => Some(vec![perm.config.permute.clone()]),
            _ => None,
        }
    }

    /// Per-child slices for this payload, or `None` for pass-through splitters.
    pub fn partition(&self, key: &str, data: &DataFlow) -> Result<Option<Vec<Slices>>, WorkflowError> {
        match self {
            Splitter::CrossValidation(cv) => {
                let labels = match data.get(&cv.config.target) {
                    Some(block) => Some(row_block(key, &cv.config.target, block)?),
                    None => None,
                };
                // Rows are counted on the target, or on X when unlabelled.
                let features = data.get(FEATURES).and_then(Block::n_rows);
                let n = match (labels, features) {
                    (Some(labels), _) => labels.len(),
                    (None, Some(rows)) => rows,
                    (None, None) => {
                        return Err(WorkflowError::MissingBlock {
                            key: key.to_string(),
                            block: cv.config.target.clone(),
                        })
                    }
                };
                if let Some(rows) = features.filter(|&rows| rows != n) {
                    return Err(WorkflowError::ShapeMismatch {
                        key: key.to_string(),
                        block: cv.config.target.clone(),
                        found: n,
                        expected: rows,
                    });
                }
                let folds = create_folds(n, &cv.config, labels)?;
                Ok(Some(
                    folds
                        .into_iter()
                        .map(|f| Slices::train_test(f.train, f.test))
                        .collect(),
                ))
            }
            Splitter::Permutations(perm) => {
                let block = data.get(&perm.config.permute).ok_or_else(|| WorkflowError::MissingBlock {
                    key: key.to_string(),
                    block: perm.config.permute.clone(),
                })?;
                let n = block.n_rows().ok_or_else(|| WorkflowError::ShapeMismatch {
                    key: key.to_string(),
                    block: perm.config.permute.clone(),
                    found: 0,
                    expected: 1,
                })?;
                Ok(Some(
                    create_permutations(n, perm.config.n_perms, perm.config.seed)
                        .into_iter()
                        .map(Slices::Rows)
                        .collect(),
                ))
            }
            Splitter::Methods | Splitter::Grid => Ok(None),
        }
    }
}

fn row_block<'a>(key: &str, name: &str, block: &'a Block) -> Result<&'a [f64], WorkflowError> {
    block.as_vector().ok_or_else(|| WorkflowError::ShapeMismatch {
        key: key.to_string(),
        block: name.to_string(),
        found: block.n_rows().unwrap_or(0),
        expected: block.n_rows().unwrap_or(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Matrix, FEATURES};
    use proptest::prelude::*;

    fn labels_4_4() -> Vec<f64> {
        vec![1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0]
    }

    #[test]
    fn stratified_two_folds_of_four() {
        let y = labels_4_4();
        let folds = create_folds(8, &CvConfig::new(2, CvKind::Stratified), Some(&y)).unwrap();
        assert_eq!(folds.len(), 2);
        for fold in &folds {
            assert_eq!(fold.test.len(), 4);
            assert_eq!(fold.train.len(), 4);
            let positives = fold.test.iter().filter(|&&i| y[i] > 0.0).count();
            assert_eq!(positives, 2);
        }
    }

    #[test]
    fn stratified_needs_labels() {
        assert!(create_folds(8, &CvConfig::new(2, CvKind::Stratified), None).is_err());
    }

    #[test]
    fn too_many_folds_is_invalid() {
        let cfg = CvConfig::new(5, CvKind::Random);
        assert!(matches!(create_folds(3, &cfg, None), Err(WorkflowError::InvalidConfig(_))));
    }

    #[test]
    fn leave_one_out_has_one_fold_per_row() {
        let folds = create_folds(4, &CvConfig::new(4, CvKind::LeaveOneOut), None).unwrap();
        assert_eq!(folds.len(), 4);
        assert_eq!(folds[2].test, vec![2]);
        assert_eq!(folds[2].train, vec![0, 1, 3]);
    }

    #[test]
    fn permutation_zero_is_identity() {
        let perms = create_permutations(10, 5, 42);
        assert_eq!(perms.len(), 5);
        assert_eq!(perms[0], (0..10).collect::<Vec<_>>());
        assert_ne!(perms[1], perms[0]);
    }

    #[test]
    fn cv_partition_reads_labels_from_payload() {
        let cv = Splitter::CrossValidation(CrossValidation {
            config: CvConfig::new(2, CvKind::Stratified),
            reducer: None,
        });
        let x = Matrix::from_rows((0..8).map(|i| vec![i as f64]).collect()).unwrap();
        let data = DataFlow::new().with(FEATURES, x).with(TARGET, labels_4_4());
        let slices = cv.partition("CV", &data).unwrap().unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].get("test").map(<[usize]>::len), Some(4));
    }

    #[test]
    fn cv_partition_rejects_mismatched_labels() {
        let cv = Splitter::CrossValidation(CrossValidation {
            config: CvConfig::new(2, CvKind::Random),
            reducer: None,
        });
        let x = Matrix::from_rows((0..8).map(|i| vec![i as f64]).collect()).unwrap();
        let data = DataFlow::new().with(FEATURES, x).with(TARGET, vec![1.0, -1.0]);
        assert!(matches!(
            cv.partition("CV", &data),
            Err(WorkflowError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn cv_partition_ignores_unrelated_blocks() {
        let cv = Splitter::CrossValidation(CrossValidation {
            config: CvConfig::new(2, CvKind::Stratified),
            reducer: None,
        });
        let x = Matrix::from_rows((0..8).map(|i| vec![i as f64]).collect()).unwrap();
        // "Alpha" sorts before both X and y.
        let data = DataFlow::new()
            .with("Alpha", vec![0.1, 0.2, 0.3])
            .with(FEATURES, x.clone())
            .with(TARGET, labels_4_4());
        let slices = cv.partition("CV", &data).unwrap().unwrap();
        assert_eq!(slices[0].get("test").map(<[usize]>::len), Some(4));

        let unlabelled = DataFlow::new().with("Alpha", vec![0.1, 0.2, 0.3]).with(FEATURES, x);
        let cv = Splitter::CrossValidation(CrossValidation {
            config: CvConfig::new(2, CvKind::Random),
            reducer: None,
        });
        let slices = cv.partition("CV", &unlabelled).unwrap().unwrap();
        let mut rows: Vec<usize> = slices.iter().flat_map(|s| s.get("test").unwrap().to_vec()).collect();
        rows.sort_unstable();
        assert_eq!(rows, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn methods_do_not_partition() {
        assert_eq!(Splitter::Methods.partition("M", &DataFlow::new()).unwrap(), None);
    }

    proptest! {
        #[test]
        fn random_folds_partition_rows(n in 2usize..60, k in 2usize..8, seed in any::<u64>()) {
            prop_assume!(k <= n);
            let cfg = CvConfig { n_folds: k, kind: CvKind::Random, seed, target: TARGET.into() };
            let folds = create_folds(n, &cfg, None).unwrap();
            prop_assert_eq!(folds.len(), k);

            let mut all_tests: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
            all_tests.sort_unstable();
            prop_assert_eq!(all_tests, (0..n).collect::<Vec<_>>());

            for fold in &folds {
                let mut union: Vec<usize> = fold.train.iter().chain(&fold.test).copied().collect();
                union.sort_unstable();
                prop_assert_eq!(union, (0..n).collect::<Vec<_>>());
                prop_assert!(fold.train.iter().all(|i| !fold.test.contains(i)));
            }
        }

        #[test]
        fn permutations_are_valid(n in 1usize..40, n_perms in 1usize..10, seed in any::<u64>()) {
            let perms = create_permutations(n, n_perms, seed);
            prop_assert_eq!(perms.len(), n_perms);
            prop_assert_eq!(&perms[0], &(0..n).collect::<Vec<_>>());
            for perm in perms {
                let mut sorted = perm.clone();
                sorted.sort_unstable();
                prop_assert_eq!(sorted, (0..n).collect::<Vec<_>>());
            }
        }
    }
}
