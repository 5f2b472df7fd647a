//! Map outputs: the values leaves contribute toward aggregation.
//!
//! Output values are a tagged variant so the aggregation merge rule is one
//! exhaustive match: a value is a `Scalar`, a `Sequence`, a `Text`, a
//! `Keyed` mapping of sub-keys, or a `Collection` built up by aggregation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::Block;

/// Output key → value, as written by a leaf.
pub type OutputMap = BTreeMap<String, OutputValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OutputValue {
    Scalar(f64),
    Sequence(Vec<f64>),
    Text(String),
    Keyed(BTreeMap<String, OutputValue>),
    /// One contribution per leaf, in leaf traversal order.
    Collection(Vec<OutputValue>),
}

impl OutputValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            OutputValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[f64]> {
        match self {
            OutputValue::Sequence(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[OutputValue]> {
        match self {
            OutputValue::Collection(items) => Some(items),
            _ => None,
        }
    }

    /// All numbers reachable from this value, depth-first, in order.
    pub fn flatten_numbers(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.collect_numbers(&mut out);
        out
    }

    fn collect_numbers(&self, out: &mut Vec<f64>) {
        match self {
            OutputValue::Scalar(v) => out.push(*v),
            OutputValue::Sequence(v) => out.extend_from_slice(v),
            OutputValue::Text(_) => {}
            OutputValue::Keyed(map) => map.values().for_each(|v| v.collect_numbers(out)),
            OutputValue::Collection(items) => items.iter().for_each(|v| v.collect_numbers(out)),
        }
    }
}

impl From<f64> for OutputValue {
    fn from(v: f64) -> Self {
        OutputValue::Scalar(v)
    }
}

impl From<Vec<f64>> for OutputValue {
    fn from(v: Vec<f64>) -> Self {
        OutputValue::Sequence(v)
    }
}

impl From<Block> for OutputValue {
    fn from(block: Block) -> Self {
        match block {
            Block::Scalar(v) => OutputValue::Scalar(v),
            Block::Vector(v) => OutputValue::Sequence(v),
            Block::Matrix(m) => OutputValue::Collection(
                m.iter_rows()
                    .map(|row| OutputValue::Sequence(row.to_vec()))
                    .collect(),
            ),
            Block::Text(s) => OutputValue::Text(s),
        }
    }
}
