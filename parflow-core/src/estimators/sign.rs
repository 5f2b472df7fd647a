//! Sign classifier: predicts ±1 from the sign of the row sum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::DataFlow;
use crate::estimator::{self, Capabilities, Estimator, EstimatorError};
use crate::key::SignatureArgs;

/// Thresholds the row sum of `X` and learns at fit which side is the
/// positive class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignClassifier {
    pub threshold: f64,
    /// `+1` when rows above the threshold are positive, `-1` otherwise.
    /// `None` until fitted.
    #[serde(default)]
    orientation: Option<f64>,
}

impl SignClassifier {
    pub const TAG: &'static str = "SignClassifier";

    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            orientation: None,
        }
    }

    pub fn from_state(state: &Value) -> Result<Self, EstimatorError> {
        estimator::decode_state(state)
    }

    pub fn orientation(&self) -> Option<f64> {
        self.orientation
    }
}

impl Default for SignClassifier {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Estimator for SignClassifier {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn params(&self) -> SignatureArgs {
        let mut args = SignatureArgs::new();
        args.insert("threshold".to_string(), self.threshold.to_string());
        args
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PREDICTOR
    }

    fn fit(&mut self, data: &DataFlow) -> Result<(), EstimatorError> {
        let (x, y) = estimator::labelled(data)?;
        let agreement: f64 = x
            .iter_rows()
            .zip(y)
            .map(|(row, label)| (row.iter().sum::<f64>() - self.threshold) * label)
            .sum();
        self.orientation = Some(if agreement < 0.0 { -1.0 } else { 1.0 });
        Ok(())
    }

    fn predict(&self, data: &DataFlow) -> Result<Vec<f64>, EstimatorError> {
        let orientation = self.orientation.ok_or_else(|| EstimatorError::NotFitted {
            tag: Self::TAG.to_string(),
        })?;
        let x = estimator::features(data)?;
        Ok(x.iter_rows()
            .map(|row| {
                if row.iter().sum::<f64>() >= self.threshold {
                    orientation
                } else {
                    -orientation
                }
            })
            .collect())
    }

    fn state(&self) -> Result<Value, EstimatorError> {
        estimator::encode_state(self)
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}
