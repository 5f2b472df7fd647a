//! Univariate feature selection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::DataFlow;
use crate::estimator::{self, Capabilities, Estimator, EstimatorError};
use crate::key::SignatureArgs;

/// Keeps the `k` columns of `X` whose class means spread the most.
///
/// The score of a column is the largest absolute difference between two
/// class means. Ties keep the lower column index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectKBest {
    pub k: usize,
    #[serde(default)]
    selected: Option<Vec<usize>>,
}

impl SelectKBest {
    pub const TAG: &'static str = "SelectKBest";

    pub fn new(k: usize) -> Self {
        Self { k, selected: None }
    }

    pub fn from_state(state: &Value) -> Result<Self, EstimatorError> {
        estimator::decode_state(state)
    }

    pub fn selected(&self) -> Option<&[usize]> {
        self.selected.as_deref()
    }
}

impl Estimator for SelectKBest {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn params(&self) -> SignatureArgs {
        let mut args = SignatureArgs::new();
        args.insert("k".to_string(), self.k.to_string());
        args
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TRANSFORMER
    }

    fn fit(&mut self, data: &DataFlow) -> Result<(), EstimatorError> {
        let (x, y) = estimator::labelled(data)?;
        if self.k > x.cols() {
            return Err(EstimatorError::Shape {
                block: crate::data::FEATURES.to_string(),
                detail: format!("k={} exceeds {} columns", self.k, x.cols()),
            });
        }
        let classes = estimator::classes(y);
        let mut scored: Vec<(usize, f64)> = (0..x.cols())
            .map(|j| {
                let column = x.column(j);
                let means: Vec<f64> = classes
                    .iter()
                    .map(|label| {
                        let members: Vec<f64> = column
                            .iter()
                            .zip(y)
                            .filter(|(_, l)| *l == label)
                            .map(|(v, _)| *v)
                            .collect();
                        members.iter().sum::<f64>() / members.len() as f64
                    })
                    .collect();
                let hi = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let lo = means.iter().copied().fold(f64::INFINITY, f64::min);
                (j, if means.is_empty() { 0.0 } else { hi - lo })
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut selected: Vec<usize> = scored.into_iter().take(self.k).map(|(j, _)| j).collect();
        selected.sort_unstable();
        self.selected = Some(selected);
        Ok(())
    }

    fn transform(&self, data: &DataFlow) -> Result<DataFlow, EstimatorError> {
        let selected = self.selected.as_ref().ok_or_else(|| EstimatorError::NotFitted {
            tag: Self::TAG.to_string(),
        })?;
        let x = estimator::features(data)?;
        if let Some(&out_of_range) = selected.iter().find(|&&j| j >= x.cols()) {
            return Err(EstimatorError::Shape {
                block: crate::data::FEATURES.to_string(),
                detail: format!("selected column {out_of_range} but X has {} columns", x.cols()),
            });
        }
        Ok(estimator::with_features(data, x.select_columns(selected)))
    }

    fn state(&self) -> Result<Value, EstimatorError> {
        estimator::encode_state(self)
    }

    fn clone_box(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}
