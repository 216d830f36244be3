//! Driver attribution strategies.
//!
//! Every strategy turns a [`FeatureMatrix`] into one importance and one
//! signed direction per feature column, so callers see the same shape no
//! matter which one ran.

use crate::correlation::pearson;
use crate::dataset::FeatureMatrix;
use campaign_core::config::DriverConfig;
use campaign_core::types::DriverMethod;
use thiserror::Error;

/// Per-feature output of a strategy, aligned with `FeatureMatrix::names`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub importances: Vec<f64>,
    /// Signed signal whose sign gives the feature's direction.
    pub directions: Vec<f64>,
    pub model_quality: Option<f64>,
}

/// Failures of the model path. Never surfaced to callers; the engine logs
/// them and falls back to correlation.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("gradient boosting support is not compiled in")]
    Unavailable,

    #[error("{rows} rows is below the {required} needed to fit a model")]
    TooFewRows { rows: usize, required: usize },

    #[error("holdout R² of {r2:.3} is below the minimum of {min:.2}")]
    LowQuality { r2: f64, min: f64 },

    #[error("holdout R² is undefined because the holdout target is constant")]
    UndefinedQuality,

    #[error("model produced non-finite attributions")]
    NonFinite,
}

pub trait DriverAttributor: Send + Sync {
    fn method(&self) -> DriverMethod;

    fn is_available(&self) -> bool {
        true
    }

    fn attribute(&self, data: &FeatureMatrix) -> Result<Attribution, ModelError>;
}

/// |Pearson r| against the target; direction is the sign of r.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationAttributor;

impl CorrelationAttributor {
    pub fn rank(&self, data: &FeatureMatrix) -> Attribution {
        let correlations: Vec<f64> = (0..data.n_features())
            .map(|j| pearson(data.column(j), data.y.view()).unwrap_or(0.0))
            .collect();
        Attribution {
            importances: correlations.iter().map(|r| r.abs()).collect(),
            directions: correlations,
            model_quality: None,
        }
    }
}

impl DriverAttributor for CorrelationAttributor {
    fn method(&self) -> DriverMethod {
        DriverMethod::Correlation
    }

    fn attribute(&self, data: &FeatureMatrix) -> Result<Attribution, ModelError> {
        Ok(self.rank(data))
    }
}

/// Gradient-boosted trees explained with tree Shapley values.
#[derive(Debug, Clone)]
pub struct GradientBoostingAttributor {
    #[cfg_attr(not(feature = "gbt"), allow(dead_code))]
    config: DriverConfig,
}

impl GradientBoostingAttributor {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }
}

impl DriverAttributor for GradientBoostingAttributor {
    fn method(&self) -> DriverMethod {
        DriverMethod::Ml
    }

    fn is_available(&self) -> bool {
        cfg!(feature = "gbt")
    }

    #[cfg(feature = "gbt")]
    fn attribute(&self, data: &FeatureMatrix) -> Result<Attribution, ModelError> {
        boosting::attribute(&self.config, data)
    }

    #[cfg(not(feature = "gbt"))]
    fn attribute(&self, _data: &FeatureMatrix) -> Result<Attribution, ModelError> {
        Err(ModelError::Unavailable)
    }
}

#[cfg(feature = "gbt")]
mod boosting {
    use super::{Attribution, ModelError};
    use crate::correlation::pearson;
    use crate::dataset::FeatureMatrix;
    use crate::gbt::{r_squared, GbtParams, GradientBoostedTrees};
    use crate::shap::ensemble_shap;
    use campaign_core::config::DriverConfig;
    use ndarray::Axis;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tracing::debug;

    pub(super) fn attribute(
        config: &DriverConfig,
        data: &FeatureMatrix,
    ) -> Result<Attribution, ModelError> {
        let n = data.n_rows();
        if n < config.min_rows_for_model.max(4) {
            return Err(ModelError::TooFewRows {
                rows: n,
                required: config.min_rows_for_model.max(4),
            });
        }

        let (train, holdout) = holdout_split(n, config.holdout_fraction, config.seed);
        let params = GbtParams::from_config(config);
        let x = data.encoded_on(&train);
        let model = GradientBoostedTrees::fit(&x, &data.y, &train, &params);

        let observed: Vec<f64> = holdout.iter().map(|&i| data.y[i]).collect();
        let predicted = model.predict(&x, &holdout);
        let r2 = r_squared(&observed, &predicted).ok_or(ModelError::UndefinedQuality)?;
        debug!(
            train_rows = train.len(),
            holdout_rows = holdout.len(),
            r2,
            "Fitted gradient-boosted trees"
        );
        if !r2.is_finite() {
            return Err(ModelError::NonFinite);
        }
        if r2 < config.min_model_quality {
            return Err(ModelError::LowQuality {
                r2,
                min: config.min_model_quality,
            });
        }

        let explained = explained_rows(n, config.shap_max_samples);
        let phi = ensemble_shap(&model, &x, &explained);
        let sample = x.select(Axis(0), &explained);

        let mut importances = Vec::with_capacity(data.n_features());
        let mut directions = Vec::with_capacity(data.n_features());
        for j in 0..data.n_features() {
            let column = phi.column(j);
            let importance = column.iter().map(|v| v.abs()).sum::<f64>() / column.len() as f64;
            if !importance.is_finite() {
                return Err(ModelError::NonFinite);
            }
            let direction = pearson(sample.column(j), column).unwrap_or(0.0);
            importances.push(importance);
            directions.push(direction);
        }

        Ok(Attribution {
            importances,
            directions,
            model_quality: Some(r2),
        })
    }

    /// Seeded shuffle, then the first `fraction` of rows are held out.
    pub(super) fn holdout_split(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let holdout_len = ((n as f64 * fraction).round() as usize).clamp(2, n.saturating_sub(2));
        let mut holdout = indices[..holdout_len].to_vec();
        let mut train = indices[holdout_len..].to_vec();
        holdout.sort_unstable();
        train.sort_unstable();
        (train, holdout)
    }

    /// At most `max` rows, evenly spaced across the dataset.
    fn explained_rows(n: usize, max: usize) -> Vec<usize> {
        let max = max.max(1);
        if n <= max {
            return (0..n).collect();
        }
        let step = n as f64 / max as f64;
        (0..max).map(|k| (k as f64 * step) as usize).collect()
    }
}
