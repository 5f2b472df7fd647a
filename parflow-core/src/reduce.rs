//! Bottom-up aggregation of leaf outputs.
//!
//! [`aggregate`] merges every leaf's map outputs into per-key collections, in
//! leaf order. [`reduce`] groups leaves by their collapsed (level-2) key,
//! merges each group, and lets splitters with a [`Reducer`] turn the merged
//! collections into summary statistics.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::key::KeyLevel;
use crate::node::{NodeId, Tree};
use crate::output::{OutputMap, OutputValue};

#[derive(Debug, Error)]
pub enum ReduceError {
    #[error("output '{key}' is keyed in one contribution and plain in another")]
    ShapeMismatch { key: String },
    #[error("{reducer} needs output '{output}' under {key}")]
    MissingOutput {
        reducer: &'static str,
        output: String,
        key: String,
    },
    #[error("{reducer}: {detail}")]
    Invalid {
        reducer: &'static str,
        detail: String,
    },
}

// ─── Merge rule ──────────────────────────────────────────────────────

/// Append one contribution to an accumulator.
///
/// A `Keyed` value is merged sub-key-wise: each sub-value is appended to the
/// collection stored under that sub-key. Any other value is appended to the
/// collection stored under the output key.
pub fn merge_contribution(acc: &mut OutputMap, contribution: OutputMap) -> Result<(), ReduceError> {
    for (key, value) in contribution {
        match value {
            OutputValue::Keyed(sub) => {
                let slot = acc
                    .entry(key.clone())
                    .or_insert_with(|| OutputValue::Keyed(BTreeMap::new()));
                let OutputValue::Keyed(slot) = slot else {
                    return Err(ReduceError::ShapeMismatch { key });
                };
                for (sub_key, sub_value) in sub {
                    match slot
                        .entry(sub_key)
                        .or_insert_with(|| OutputValue::Collection(Vec::new()))
                    {
                        OutputValue::Collection(items) => items.push(sub_value),
                        _ => return Err(ReduceError::ShapeMismatch { key }),
                    }
                }
            }
            other => {
                match acc
                    .entry(key.clone())
                    .or_insert_with(|| OutputValue::Collection(Vec::new()))
                {
                    OutputValue::Collection(items) => items.push(other),
                    _ => return Err(ReduceError::ShapeMismatch { key }),
                }
            }
        }
    }
    Ok(())
}

/// Leaves return their map outputs verbatim; internal nodes merge their
/// children's aggregates in child order.
pub fn aggregate(tree: &Tree, id: NodeId) -> Result<OutputMap, ReduceError> {
    if tree.is_leaf(id) {
        return Ok(tree.node(id).map_outputs().clone());
    }
    let mut acc = OutputMap::new();
    for &child in tree.children(id) {
        merge_contribution(&mut acc, aggregate(tree, child)?)?;
    }
    Ok(acc)
}

// ─── Reducers ────────────────────────────────────────────────────────

/// Summarises the merged outputs of one key-2 group.
pub trait Reducer: fmt::Debug + Send + Sync {
    /// Stable type tag for the registry.
    fn type_tag(&self) -> &'static str;

    fn reduce(&self, key: &str, outputs: &OutputMap) -> Result<OutputMap, ReduceError>;

    /// Persisted parameters.
    fn state(&self) -> Value {
        Value::Null
    }

    fn clone_box(&self) -> Box<dyn Reducer>;
}

impl Clone for Box<dyn Reducer> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Accuracy, per-class recall and mean recall from `pred` / `true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport;

impl ClassificationReport {
    pub const TAG: &'static str = "ClassificationReport";

    fn numbers(&self, key: &str, outputs: &OutputMap, name: &str) -> Result<Vec<f64>, ReduceError> {
        outputs
            .get(name)
            .map(OutputValue::flatten_numbers)
            .ok_or_else(|| ReduceError::MissingOutput {
                reducer: Self::TAG,
                output: name.to_string(),
                key: key.to_string(),
            })
    }
}

impl Reducer for ClassificationReport {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn reduce(&self, key: &str, outputs: &OutputMap) -> Result<OutputMap, ReduceError> {
        let pred = self.numbers(key, outputs, crate::node::PRED)?;
        let truth = self.numbers(key, outputs, crate::node::TRUE)?;
        if pred.len() != truth.len() || pred.is_empty() {
            return Err(ReduceError::Invalid {
                reducer: Self::TAG,
                detail: format!("{} predictions for {} labels", pred.len(), truth.len()),
            });
        }
        let correct = pred.iter().zip(&truth).filter(|(p, t)| p == t).count();

        let mut recall = BTreeMap::new();
        for class in crate::estimator::classes(&truth) {
            let (hits, total) = pred
                .iter()
                .zip(&truth)
                .filter(|(_, t)| **t == class)
                .fold((0usize, 0usize), |(h, n), (p, _)| (h + usize::from(*p == class), n + 1));
            recall.insert(class.to_string(), OutputValue::Scalar(hits as f64 / total as f64));
        }
        let mean_recall = recall.values().filter_map(OutputValue::as_scalar).sum::<f64>()
            / recall.len() as f64;

        let mut out = OutputMap::new();
        out.insert("accuracy".into(), OutputValue::Scalar(correct as f64 / pred.len() as f64));
        out.insert("mean_recall".into(), OutputValue::Scalar(mean_recall));
        out.insert("recall".into(), OutputValue::Keyed(recall));
        out.insert("n".into(), OutputValue::Scalar(pred.len() as f64));
        Ok(out)
    }

    fn clone_box(&self) -> Box<dyn Reducer> {
        Box::new(*self)
    }
}

/// Permutation p-values.
///
/// Every collection of scalars is read as one score per permutation, the
/// first being the unpermuted one. The reduced output keeps that observed
/// score under the original key and adds `<key>_pval`: the share of
/// permutations (identity included) scoring at least the observed value.
/// Keyed outputs are handled per sub-key; anything else passes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PvalPermutations;

impl PvalPermutations {
    pub const TAG: &'static str = "PvalPermutations";

    fn scores(value: &OutputValue) -> Option<Vec<f64>> {
        value
            .as_collection()?
            .iter()
            .map(OutputValue::as_scalar)
            .collect::<Option<Vec<f64>>>()
            .filter(|s| !s.is_empty())
    }

    fn pval(scores: &[f64]) -> (f64, f64) {
        let observed = scores[0];
        let at_least = scores.iter().filter(|&&s| s >= observed).count();
        (observed, at_least as f64 / scores.len() as f64)
    }
}

impl Reducer for PvalPermutations {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn reduce(&self, _key: &str, outputs: &OutputMap) -> Result<OutputMap, ReduceError> {
        let mut out = OutputMap::new();
        for (name, value) in outputs {
            if let Some(scores) = Self::scores(value) {
                let (observed, pval) = Self::pval(&scores);
                out.insert(name.clone(), OutputValue::Scalar(observed));
                out.insert(format!("{name}_pval"), OutputValue::Scalar(pval));
                continue;
            }
            if let OutputValue::Keyed(sub) = value {
                let mut observed = BTreeMap::new();
                let mut pvals = BTreeMap::new();
                for (sub_key, sub_value) in sub {
                    match Self::scores(sub_value) {
                        Some(scores) => {
                            let (o, p) = Self::pval(&scores);
                            observed.insert(sub_key.clone(), OutputValue::Scalar(o));
                            pvals.insert(sub_key.clone(), OutputValue::Scalar(p));
                        }
                        None => {
                            observed.insert(sub_key.clone(), sub_value.clone());
                        }
                    }
                }
                out.insert(name.clone(), OutputValue::Keyed(observed));
                if !pvals.is_empty() {
                    out.insert(format!("{name}_pval"), OutputValue::Keyed(pvals));
                }
                continue;
            }
            out.insert(name.clone(), value.clone());
        }
        Ok(out)
    }

    fn clone_box(&self) -> Box<dyn Reducer> {
        Box::new(*self)
    }
}

// ─── Result sets ─────────────────────────────────────────────────────

/// Outputs of one key-2 group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Collapsed key shared by the group.
    pub key: String,
    /// Full keys of the leaves that contributed, in leaf order.
    pub contributors: Vec<String>,
    pub outputs: OutputMap,
}

/// Reduction result: one entry per distinct collapsed key, in order of first
/// appearance in leaf order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    entries: Vec<ResultEntry>,
}

impl ResultSet {
    pub fn get(&self, key: &str) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultEntry> + '_ {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for ResultSet {
    type Item = ResultEntry;
    type IntoIter = std::vec::IntoIter<ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Reduce the subtree at `id`.
///
/// At every internal node the children's entries are grouped by collapsed
/// key. A group with one entry is kept verbatim; larger groups are merged
/// with [`merge_contribution`]. A splitter carrying a reducer then reduces
/// each of its groups.
pub fn reduce(tree: &Tree, id: NodeId) -> Result<ResultSet, ReduceError> {
    let entries = reduce_node(tree, id)?;
    debug!(groups = entries.len(), "reduced");
    Ok(ResultSet { entries })
}

fn reduce_node(tree: &Tree, id: NodeId) -> Result<Vec<ResultEntry>, ReduceError> {
    if tree.is_leaf(id) {
        return Ok(vec![ResultEntry {
            key: tree.get_key(id, KeyLevel::Collapsed),
            contributors: vec![tree.get_key(id, KeyLevel::Full)],
            outputs: tree.node(id).map_outputs().clone(),
        }]);
    }

    let mut groups: Vec<Vec<ResultEntry>> = Vec::new();
    for &child in tree.children(id) {
        for entry in reduce_node(tree, child)? {
            match groups.iter_mut().find(|g| g[0].key == entry.key) {
                Some(group) => group.push(entry),
                None => groups.push(vec![entry]),
            }
        }
    }

    let reducer = tree.node(id).as_splitter().and_then(|s| s.reducer());
    groups
        .into_iter()
        .map(|group| {
            let mut merged = merge_group(group)?;
            if let Some(reducer) = reducer {
                merged.outputs = reducer.reduce(&merged.key, &merged.outputs)?;
            }
            Ok(merged)
        })
        .collect()
}

fn merge_group(mut group: Vec<ResultEntry>) -> Result<ResultEntry, ReduceError> {
    if group.len() == 1 {
        if let Some(single) = group.pop() {
            return Ok(single);
        }
    }
    let key = group.first().map(|e| e.key.clone()).unwrap_or_default();
    let mut contributors = Vec::new();
    let mut outputs = OutputMap::new();
    for entry in group {
        contributors.extend(entry.contributors);
        merge_contribution(&mut outputs, entry.outputs)?;
    }
    Ok(ResultEntry {
        key,
        contributors,
        outputs,
    })
}
