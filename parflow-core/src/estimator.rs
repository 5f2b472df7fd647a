//! Estimator capability interface.
//!
//! Anything that can be fitted on a payload and then either transforms it or
//! predicts from it can sit in a tree. Capabilities are declared up front and
//! checked once when the node wrapping the estimator is constructed, never
//! per call.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::data::{Block, DataFlow, Matrix, FEATURES, TARGET};
use crate::key::SignatureArgs;

/// Errors raised by estimators.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("{tag} used before fit")]
    NotFitted { tag: String },
    #[error("payload has no block '{0}'")]
    MissingBlock(String),
    #[error("block '{block}' has the wrong shape: {detail}")]
    Shape { block: String, detail: String },
    #[error("{tag} does not support {op}")]
    Unsupported { tag: String, op: &'static str },
    #[error("invalid estimator state: {0}")]
    InvalidState(String),
}

/// Optional operations an estimator supports. `fit` is always required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub transform: bool,
    pub predict: bool,
}

impl Capabilities {
    pub const PREDICTOR: Capabilities = Capabilities {
        transform: false,
        predict: true,
    };
    pub const TRANSFORMER: Capabilities = Capabilities {
        transform: true,
        predict: false,
    };
}

/// Trait for wrapped estimators.
pub trait Estimator: fmt::Debug + Send + Sync {
    /// Stable type tag; doubles as the node name and the registry key.
    fn type_tag(&self) -> &'static str;

    /// Constructor arguments, stringified. Used to tell apart siblings that
    /// would otherwise share a signature.
    fn params(&self) -> SignatureArgs;

    fn capabilities(&self) -> Capabilities;

    fn fit(&mut self, data: &DataFlow) -> Result<(), EstimatorError>;

    fn transform(&self, _data: &DataFlow) -> Result<DataFlow, EstimatorError> {
        Err(EstimatorError::Unsupported {
            tag: self.type_tag().to_string(),
            op: "transform",
        })
    }

    fn predict(&self, _data: &DataFlow) -> Result<Vec<f64>, EstimatorError> {
        Err(EstimatorError::Unsupported {
            tag: self.type_tag().to_string(),
            op: "predict",
        })
    }

    /// Full persisted state (parameters plus anything learned by `fit`).
    fn state(&self) -> Result<Value, EstimatorError>;

    /// Clone into a boxed trait object
    fn clone_box(&self) -> Box<dyn Estimator>;
}

impl Clone for Box<dyn Estimator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

// ─── Payload helpers for implementations ─────────────────────────────

/// The feature block as a matrix (a vector block becomes one column).
pub fn features(data: &DataFlow) -> Result<Matrix, EstimatorError> {
    let block = data
        .get(FEATURES)
        .ok_or_else(|| EstimatorError::MissingBlock(FEATURES.to_string()))?;
    block.to_matrix().ok_or_else(|| EstimatorError::Shape {
        block: FEATURES.to_string(),
        detail: "expected a vector or matrix".to_string(),
    })
}

/// The target block as a vector.
pub fn target(data: &DataFlow) -> Result<&[f64], EstimatorError> {
    data.get(TARGET)
        .ok_or_else(|| EstimatorError::MissingBlock(TARGET.to_string()))?
        .as_vector()
        .ok_or_else(|| EstimatorError::Shape {
            block: TARGET.to_string(),
            detail: "expected a vector".to_string(),
        })
}

/// Features and target, checked to have the same row count.
pub fn labelled(data: &DataFlow) -> Result<(Matrix, &[f64]), EstimatorError> {
    let x = features(data)?;
    let y = target(data)?;
    if x.rows() != y.len() {
        return Err(EstimatorError::Shape {
            block: TARGET.to_string(),
            detail: format!("{} labels for {} rows", y.len(), x.rows()),
        });
    }
    Ok((x, y))
}

/// Copy of `data` with the feature block replaced.
pub fn with_features(data: &DataFlow, x: Matrix) -> DataFlow {
    let mut out = data.clone();
    out.insert(FEATURES, Block::Matrix(x));
    out
}

/// Distinct labels in ascending order.
pub fn classes(y: &[f64]) -> Vec<f64> {
    let mut classes: Vec<f64> = y.to_vec();
    classes.sort_by(f64::total_cmp);
    classes.dedup();
    classes
}

pub(crate) fn decode_state<T: serde::de::DeserializeOwned>(state: &Value) -> Result<T, EstimatorError> {
    serde_json::from_value(state.clone()).map_err(|e| EstimatorError::InvalidState(e.to_string()))
}

pub(crate) fn encode_state<T: serde::Serialize>(value: &T) -> Result<Value, EstimatorError> {
    serde_json::to_value(value).map_err(|e| EstimatorError::InvalidState(e.to_string()))
}
