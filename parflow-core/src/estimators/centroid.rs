//! Nearest-centroid classifier.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::DataFlow;
use crate::estimator::{self, Capabilities, Estimator, EstimatorError};
use crate::key::SignatureArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
}

impl Metric {
    fn distance(self, a: &[f64], b: &[f64]) -> f64 {
        let pairs = a.iter().zip(b);
        match self {
            Metric::Euclidean => pairs.map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
            Metric::Manhattan => pairs.map(|(x, y)| (x - y).abs()).sum(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Centroid {
    label: f64,
    center: Vec<f64>,
}

/// Assigns each row the label of the closest class mean.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    centroids: Vec<Centroid>,
}

impl NearestCentroid {
    pub const TAG: &'static str = "NearestCentroid";

    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            centroids: Vec::new(),
        }
    }

    pub fn from_state(state: &Value) -> Result<Self, EstimatorError> {
        estimator::decode_state(state)
    }
}

impl Estimator for NearestCentroid {
    fn type_tag(&self) -> &'static str {
        Self::TAG
    }

    fn params(&self) -> SignatureArgs {
        let mut args = SignatureArgs::new();
        args.insert("metric".to_string(), self.metric.as_str().to_string());
        args
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::PREDICTOR
    }

    fn fit(&mut self, data: &DataFlow) -> Result<(), EstimatorError> {
        let (x, y) = estimator::labelled(data)?;
        self.centroids = estimator::classes(y)
            .into_iter()
            .map(|label| {
                let mut center = vec![0.0; x.cols()];
                let mut count = 0usize;
                for (row, _) in x.iter_rows().zip(y).filter(|(_, l)| **l == label) {
                    center.iter_mut().zip(row).for_each(|(c, v)| *c += v);
                    count += 1;
                }
                center.iter_mut().for_each(|c| *c /= count as f64);
                Centroid { label, center }
            })
            .collect();
        Ok(())
    }

    fn predict(&self, data: &DataFlow) -> Result<Vec<f64>, EstimatorError> {
        if self.centroids.is_empty() {
            return Err(EstimatorError::NotFitted {
                tag: Self::TAG.to_string(),
            });
        }
        let x = estimator::features(data)?;
        Ok(x.iter_rows()
            .map(|row| {
                self.centroids
                    .iter()
                    .map(|c| (c.label, self.metric.distance(row, &c.center)))
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map_or(f64::NAN, |(label, _)| label)
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
