//! Top-down execution of fit / transform / predict.
//!
//! Each node applies its own operation to the incoming payload and hands the
//! result to its children. A leaf executed on its own first recomposes every
//! ancestor's operation from the root down.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{EstimatorNode, NodeId, NodeKind, Tree};
use crate::data::{Block, DataFlow, TARGET};
use crate::error::WorkflowError;
use crate::estimator::EstimatorError;
use crate::key::KeyLevel;
use crate::output::{OutputMap, OutputValue};
use crate::slicer::{Slices, TEST, TRAIN};

/// Map-output key of leaf predictions.
pub const PRED: &str = "pred";
/// Map-output key of the matching ground truth.
pub const TRUE: &str = "true";

/// Execution operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Slicers serve their `train` rows; estimators train.
    Fit,
    /// Slicers serve their `test` rows; leaves predict.
    Predict,
    /// Slicers serve the named sample set; leaves emit transformed blocks.
    Transform(Option<String>),
}

impl Op {
    pub fn sample_set(&self) -> Option<&str> {
        match self {
            Op::Fit => Some(TRAIN),
            Op::Predict => Some(TEST),
            Op::Transform(sample_set) => sample_set.as_deref(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Fit => write!(f, "fit"),
            Op::Predict => write!(f, "predict"),
            Op::Transform(None) => write!(f, "transform"),
            Op::Transform(Some(set)) => write!(f, "transform({set})"),
        }
    }
}

impl EstimatorNode {
    /// Apply `op`; returns the payload for the children and, at a leaf, the
    /// map outputs to record.
    fn run(
        &mut self,
        op: &Op,
        leaf: bool,
        data: DataFlow,
    ) -> Result<(DataFlow, Option<OutputMap>), EstimatorError> {
        match (op, leaf) {
            (Op::Fit, true) => {
                self.estimator.fit(&data)?;
                Ok((data, None))
            }
            (Op::Fit, false) => {
                self.estimator.fit(&data)?;
                let out = self.estimator.transform(&data)?;
                Ok((out, None))
            }
            (_, false) => Ok((self.estimator.transform(&data)?, None)),
            (Op::Transform(_), true) if self.capabilities.transform => {
                let out = self.estimator.transform(&data)?;
                let outputs = out
                    .iter()
                    .map(|(k, b)| (k.clone(), OutputValue::from(b.clone())))
                    .collect();
                Ok((out, Some(outputs)))
            }
            (Op::Predict, true) if !self.capabilities.predict => {
                let out = self.estimator.transform(&data)?;
                let outputs = out
                    .iter()
                    .map(|(k, b)| (k.clone(), OutputValue::from(b.clone())))
                    .collect();
                Ok((out, Some(outputs)))
            }
            (_, true) => {
                let pred = self.estimator.predict(&data)?;
                let mut outputs = OutputMap::new();
                outputs.insert(PRED.to_string(), OutputValue::Sequence(pred));
                if let Some(truth) = data.get(TARGET).and_then(Block::as_vector) {
                    outputs.insert(TRUE.to_string(), OutputValue::Sequence(truth.to_vec()));
                }
                Ok((data, Some(outputs)))
            }
        }
    }
}

impl Tree {
    /// Run `op` at `id`.
    ///
    /// Without recursion only the node's own operation is applied. With
    /// recursion the root applies its operation and recurses into every
    /// child, while a non-root leaf recomposes the path from the root
    /// first; any other node is a [`WorkflowError::RecursionFromInnerNode`].
    /// Returns the payload produced at `id`.
    pub fn run(
        &mut self,
        id: NodeId,
        op: &Op,
        recursion: bool,
        data: DataFlow,
    ) -> Result<DataFlow, WorkflowError> {
        if !recursion {
            return self.apply(id, op, data);
        }
        if id == self.root() {
            return self.descend(id, op, data, None);
        }
        if self.is_leaf(id) {
            return self.run_leaf(id, op, data);
        }
        Err(WorkflowError::RecursionFromInnerNode {
            key: self.get_key(id, KeyLevel::Full),
            op: op.to_string(),
        })
    }

    #[instrument(skip_all)]
    pub fn fit(&mut self, data: DataFlow) -> Result<(), WorkflowError> {
        self.run(self.root(), &Op::Fit, true, data).map(drop)
    }

    #[instrument(skip_all)]
    pub fn predict(&mut self, data: DataFlow) -> Result<(), WorkflowError> {
        self.run(self.root(), &Op::Predict, true, data).map(drop)
    }

    #[instrument(skip(self, data))]
    pub fn transform(&mut self, data: DataFlow, sample_set: Option<&str>) -> Result<(), WorkflowError> {
        let op = Op::Transform(sample_set.map(str::to_string));
        self.run(self.root(), &op, true, data).map(drop)
    }

    pub fn fit_predict(&mut self, data: DataFlow) -> Result<(), WorkflowError> {
        self.fit(data.clone())?;
        self.predict(data)
    }

    /// Recompose the path from the root to `leaf`, applying `op` at each
    /// node in turn. Returns the payload produced at `leaf`.
    pub fn run_leaf(&mut self, leaf: NodeId, op: &Op, data: DataFlow) -> Result<DataFlow, WorkflowError> {
        let mut data = data;
        for id in self.get_path_from_root(leaf) {
            data = self.apply(id, op, data)?;
        }
        Ok(data)
    }

    /// Top-down `op` restricted to the paths leading to `leaves`.
    #[instrument(skip(self, data, leaves), fields(leaves = leaves.len()))]
    pub fn run_leaves(&mut self, op: &Op, data: DataFlow, leaves: &[NodeId]) -> Result<(), WorkflowError> {
        let keep: HashSet<NodeId> = leaves
            .iter()
            .flat_map(|&leaf| self.get_path_from_root(leaf))
            .collect();
        if keep.is_empty() {
            return Ok(());
        }
        self.descend(self.root(), op, data, Some(&keep)).map(drop)
    }

    fn descend(
        &mut self,
        id: NodeId,
        op: &Op,
        data: DataFlow,
        keep: Option<&HashSet<NodeId>>,
    ) -> Result<DataFlow, WorkflowError> {
        let out = self.apply(id, op, data)?;
        let children = self.children(id).to_vec();
        for child in children {
            if keep.map_or(true, |k| k.contains(&child)) {
                self.descend(child, op, out.clone(), keep)?;
            }
        }
        Ok(out)
    }

    /// The node's own operation, no recursion.
    fn apply(&mut self, id: NodeId, op: &Op, data: DataFlow) -> Result<DataFlow, WorkflowError> {
        let key = self.get_key(id, KeyLevel::Full);
        debug!(key = %key, op = %op, "apply");

        if let NodeKind::Splitter(splitter) = &self.node(id).kind {
            if let Some(slices) = splitter.partition(&key, &data)? {
                self.assign_slices(id, &key, slices)?;
            }
            return Ok(data);
        }

        let leaf = self.is_leaf(id);
        let node = self.node_mut(id);
        match &mut node.kind {
            NodeKind::Slicer(slicer) => slicer.transform(&key, data, op.sample_set()),
            NodeKind::Estimator(estimator) => {
                let (out, outputs) = estimator
                    .run(op, leaf, data)
                    .map_err(|source| WorkflowError::Estimator { key, source })?;
                if let Some(outputs) = outputs {
                    node.add_map_outputs(outputs);
                }
                Ok(out)
            }
            NodeKind::Splitter(_) => Ok(data),
        }
    }

    fn assign_slices(&mut self, id: NodeId, key: &str, slices: Vec<Slices>) -> Result<(), WorkflowError> {
        let children = self.children(id).to_vec();
        if slices.len() != children.len() {
            return Err(WorkflowError::FoldCountMismatch {
                key: key.to_string(),
                computed: slices.len(),
                children: children.len(),
            });
        }
        for (child, slice) in children.into_iter().zip(slices) {
            let slicer = self.node_mut(child).as_slicer_mut().ok_or_else(|| {
                WorkflowError::InvalidConfig(format!("child {} of {key} is not a slicer", child.index()))
            })?;
            slicer.set_slices(slice);
        }
        Ok(())
    }
}
