//! Driver analysis for campaign metrics — ranks row-level features by their
//! influence on a target metric with gradient-boosted trees and tree Shapley
//! values, falling back to Pearson correlation.

pub mod attributor;
pub mod correlation;
pub mod dataset;
pub mod engine;
#[cfg(feature = "gbt")]
pub mod gbt;
#[cfg(feature = "gbt")]
pub mod shap;

pub use attributor::{
    Attribution, CorrelationAttributor, DriverAttributor, GradientBoostingAttributor, ModelError,
};
pub use dataset::FeatureMatrix;
pub use engine::DriverAnalysisEngine;
