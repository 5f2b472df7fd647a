//! Built-in estimators.
//!
//! Small, dependency-free models used by the command-line demos and the test
//! suite. Real workloads register their own estimators in a
//! [`Registry`](crate::registry::Registry).

mod centroid;
mod select;
mod sign;

pub use centroid::NearestCentroid;
pub use select::SelectKBest;
pub use sign::SignClassifier;
