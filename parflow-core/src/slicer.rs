//! Row slicers.
//!
//! A slicer is the child a splitter creates for each branch. Its splitter
//! assigns it a set of row indices at execution time; the slicer then
//! re-indexes every payload block whose leading dimension matches the
//! original row count. Other blocks pass through unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::DataFlow;
use crate::error::WorkflowError;

/// Sample set used by `fit`.
pub const TRAIN: &str = "train";
/// Sample set used by `predict`.
pub const TEST: &str = "test";

/// Row indices held by a slicer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slices {
    /// One ordered index list, applied whatever the sample set.
    Rows(Vec<usize>),
    /// Named index lists, e.g. `{"train": [...], "test": [...]}`.
    Sets(BTreeMap<String, Vec<usize>>),
}

impl Slices {
    /// Train/test pair.
    pub fn train_test(train: Vec<usize>, test: Vec<usize>) -> Self {
        let mut sets = BTreeMap::new();
        sets.insert(TRAIN.to_string(), train);
        sets.insert(TEST.to_string(), test);
        Slices::Sets(sets)
    }

    /// Row count of the payload these slices index into.
    pub fn source_rows(&self) -> usize {
        match self {
            Slices::Rows(rows) => rows.len(),
            Slices::Sets(sets) => sets.values().map(Vec::len).sum(),
        }
    }

    pub fn get(&self, sample_set: &str) -> Option<&[usize]> {
        match self {
            Slices::Rows(rows) => Some(rows),
            Slices::Sets(sets) => sets.get(sample_set).map(Vec::as_slice),
        }
    }
}

/// Child of a splitter that subsets payload rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSlicer {
    /// Branch number within the parent splitter.
    pub nb: usize,
    /// Restrict slicing to these blocks; `None` slices every matching block.
    pub apply_on: Option<Vec<String>>,
    slices: Option<Slices>,
}

impl RowSlicer {
    pub fn new(nb: usize, apply_on: Option<Vec<String>>) -> Self {
        Self {
            nb,
            apply_on,
            slices: None,
        }
    }

    pub fn slices(&self) -> Option<&Slices> {
        self.slices.as_ref()
    }

    pub fn set_slices(&mut self, slices: Slices) {
        self.slices = Some(slices);
    }

    /// Re-index the payload for this branch.
    ///
    /// `key` is only used to name the slicer in errors.
    pub fn transform(
        &self,
        key: &str,
        mut data: DataFlow,
        sample_set: Option<&str>,
    ) -> Result<DataFlow, WorkflowError> {
        let slices = self.slices.as_ref().ok_or_else(|| WorkflowError::UninitializedSlicer {
            key: key.to_string(),
            op: sample_set.unwrap_or("transform").to_string(),
        })?;
        let indices: &[usize] = match (slices, sample_set) {
            (Slices::Rows(rows), _) => rows,
            (Slices::Sets(sets), Some(name)) => {
                sets.get(name)
                    .ok_or_else(|| WorkflowError::UnknownSampleSet {
                        key: key.to_string(),
                        sample_set: name.to_string(),
                    })?
            }
            (Slices::Sets(sets), None) => match sets.values().next() {
                Some(only) if sets.len() == 1 => only,
                _ => {
                    return Err(WorkflowError::AmbiguousSampleSet {
                        key: key.to_string(),
                        available: sets.keys().cloned().collect(),
                    })
                }
            },
        };

        let expected = slices.source_rows();
        let targets: Vec<String> = match &self.apply_on {
            Some(names) => names.clone(),
            None => data.names().cloned().collect(),
        };
        for name in targets {
            let sliced = match data.get(&name) {
                Some(block) if block.n_rows() == Some(expected) => block.take_rows(indices),
                _ => continue,
            };
            data.insert(name, sliced);
        }
        Ok(data)
    }
}
