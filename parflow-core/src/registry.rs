//! Type-tag registry for rebuilding estimators and reducers from stored
//! state.
//!
//! Stored descriptors carry a stable tag plus a JSON state; loading looks the
//! tag up here and hands the state to the registered constructor.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::estimator::{Estimator, EstimatorError};
use crate::estimators::{NearestCentroid, SelectKBest, SignClassifier};
use crate::reduce::{ClassificationReport, PvalPermutations, Reducer};
use crate::store::StoreError;

type EstimatorCtor = Box<dyn Fn(&Value) -> Result<Box<dyn Estimator>, EstimatorError> + Send + Sync>;
type ReducerCtor = Box<dyn Fn(&Value) -> Result<Box<dyn Reducer>, EstimatorError> + Send + Sync>;

/// Constructors keyed by type tag.
pub struct Registry {
    estimators: HashMap<String, EstimatorCtor>,
    reducers: HashMap<String, ReducerCtor>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            estimators: HashMap::new(),
            reducers: HashMap::new(),
        }
    }

    /// Registry holding every built-in estimator and reducer.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_estimator(SignClassifier::TAG, |s| {
            Ok(Box::new(SignClassifier::from_state(s)?))
        });
        registry.register_estimator(NearestCentroid::TAG, |s| {
            Ok(Box::new(NearestCentroid::from_state(s)?))
        });
        registry.register_estimator(SelectKBest::TAG, |s| Ok(Box::new(SelectKBest::from_state(s)?)));
        registry.register_reducer(ClassificationReport::TAG, |_| Ok(Box::new(ClassificationReport)));
        registry.register_reducer(PvalPermutations::TAG, |_| Ok(Box::new(PvalPermutations)));
        registry
    }

    pub fn register_estimator<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Estimator>, EstimatorError> + Send + Sync + 'static,
    {
        self.estimators.insert(tag.into(), Box::new(constructor));
    }

    pub fn register_reducer<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Reducer>, EstimatorError> + Send + Sync + 'static,
    {
        self.reducers.insert(tag.into(), Box::new(constructor));
    }

    pub fn create_estimator(&self, tag: &str, state: &Value) -> Result<Box<dyn Estimator>, StoreError> {
        let ctor = self.estimators.get(tag).ok_or_else(|| StoreError::Registry {
            kind: "estimator",
            tag: tag.to_string(),
        })?;
        ctor(state).map_err(|e| StoreError::corrupt(tag, e))
    }

    pub fn create_reducer(&self, tag: &str, state: &Value) -> Result<Box<dyn Reducer>, StoreError> {
        let ctor = self.reducers.get(tag).ok_or_else(|| StoreError::Registry {
            kind: "reducer",
            tag: tag.to_string(),
        })?;
        ctor(state).map_err(|e| StoreError::corrupt(tag, e))
    }

    /// Check if a tag is registered, as an estimator or a reducer
    pub fn contains(&self, tag: &str) -> bool {
        self.estimators.contains_key(tag) || self.reducers.contains_key(tag)
    }

    /// All registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self
            .estimators
            .keys()
            .chain(self.reducers.keys())
            .map(String::as_str)
            .collect();
        tags.sort_unstable();
        tags
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("tags", &self.tags()).finish()
    }
}
