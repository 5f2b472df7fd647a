//! Data flow: the keyword payload that travels down the execution tree.
//!
//! A `DataFlow` maps block names (`"X"`, `"y"`, ...) to `Block`s. Row-shaped
//! blocks (vectors and matrices) can be re-sliced by slicers; scalars and text
//! pass through untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the feature block by convention.
pub const FEATURES: &str = "X";
/// Name of the target block by convention.
pub const TARGET: &str = "y";

/// Errors raised while assembling data blocks.
#[derive(Debug, Error, PartialEq)]
pub enum DataError {
    #[error("matrix shape {rows}x{cols} does not match {len} values")]
    ShapeMismatch { rows: usize, cols: usize, len: usize },
    #[error("ragged rows: row {row} has {found} columns, expected {expected}")]
    RaggedRows {
        row: usize,
        found: usize,
        expected: usize,
    },
}

// ─── Matrix ──────────────────────────────────────────────────────────

/// Dense row-major matrix of `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, DataError> {
        if rows * cols != data.len() {
            return Err(DataError::ShapeMismatch {
                rows,
                cols,
                len: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from a list of rows; all rows must share one width.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, DataError> {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        let mut data = Vec::with_capacity(n * cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != cols {
                return Err(DataError::RaggedRows {
                    row: i,
                    found: row.len(),
                    expected: cols,
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |i| self.row(i))
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.data[i * self.cols + j]).collect()
    }

    /// New matrix holding the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Matrix {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// New matrix holding the given columns, in the given order.
    pub fn select_columns(&self, columns: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(self.rows * columns.len());
        for row in self.iter_rows() {
            data.extend(columns.iter().map(|&j| row[j]));
        }
        Matrix {
            rows: self.rows,
            cols: columns.len(),
            data,
        }
    }
}

// ─── Block ───────────────────────────────────────────────────────────

/// One entry of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Block {
    Scalar(f64),
    Vector(Vec<f64>),
    Matrix(Matrix),
    Text(String),
}

impl Block {
    /// Leading dimension, for blocks that can be row-sliced.
    pub fn n_rows(&self) -> Option<usize> {
        match self {
            Block::Vector(v) => Some(v.len()),
            Block::Matrix(m) => Some(m.rows()),
            Block::Scalar(_) | Block::Text(_) => None,
        }
    }

    /// Re-index the rows of a row-shaped block. Other blocks are returned as is.
    pub fn take_rows(&self, indices: &[usize]) -> Block {
        match self {
            Block::Vector(v) => Block::Vector(indices.iter().map(|&i| v[i]).collect()),
            Block::Matrix(m) => Block::Matrix(m.take_rows(indices)),
            other => other.clone(),
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            Block::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&Matrix> {
        match self {
            Block::Matrix(m) => Some(m),
            _ => None,
        }
    }

    /// View a vector or matrix as a matrix (a vector becomes one column).
    pub fn to_matrix(&self) -> Option<Matrix> {
        match self {
            Block::Matrix(m) => Some(m.clone()),
            Block::Vector(v) => Some(Matrix {
                rows: v.len(),
                cols: 1,
                data: v.clone(),
            }),
            Block::Scalar(_) | Block::Text(_) => None,
        }
    }
}

impl From<Vec<f64>> for Block {
    fn from(v: Vec<f64>) -> Self {
        Block::Vector(v)
    }
}

impl From<Matrix> for Block {
    fn from(m: Matrix) -> Self {
        Block::Matrix(m)
    }
}

impl From<f64> for Block {
    fn from(v: f64) -> Self {
        Block::Scalar(v)
    }
}

// ─── DataFlow ────────────────────────────────────────────────────────

/// Keyword payload passed from node to node.
///
/// Uses `BTreeMap` so iteration order (and therefore slicing order and
/// serialization) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    blocks: BTreeMap<String, Block>,
}

impl DataFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, block: impl Into<Block>) -> Self {
        self.blocks.insert(name.into(), block.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, block: impl Into<Block>) -> Option<Block> {
        self.blocks.insert(name.into(), block.into())
    }

    pub fn get(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Block> {
        self.blocks.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> + '_ {
        self.blocks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Block)> + '_ {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Row count of the first row-shaped block, in name order.
    pub fn row_count(&self) -> Option<usize> {
        self.blocks.values().find_map(Block::n_rows)
    }
}

impl FromIterator<(String, Block)> for DataFlow {
    fn from_iter<I: IntoIterator<Item = (String, Block)>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DataFlow {
    type Item = (String, Block);
    type IntoIter = std::collections::btree_map::IntoIter<String, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}
