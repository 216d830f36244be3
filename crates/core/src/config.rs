use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Root configuration. Loaded from environment variables with the prefix
/// `CAMPAIGN_RCA__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub drivers: DriverConfig,
    #[serde(default)]
    pub insights: InsightConfig,
}

/// Period splitting, decomposition and confidence scoring.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Minimum rows each window must contain.
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    /// Rows below which confidence is capped.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_significance_weight")]
    pub significance_weight: f64,
    #[serde(default = "default_low_confidence_cap")]
    pub low_confidence_cap: f64,
}

/// Gradient-boosted driver model and its correlation fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    #[serde(default = "default_holdout_fraction")]
    pub holdout_fraction: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Holdout R² below which the correlation fallback is used.
    #[serde(default = "default_min_model_quality")]
    pub min_model_quality: f64,
    #[serde(default = "default_min_rows_for_model")]
    pub min_rows_for_model: usize,
    /// Rows explained by Shapley values; larger datasets are subsampled evenly.
    #[serde(default = "default_shap_max_samples")]
    pub shap_max_samples: usize,
    /// Fraction of rows a feature must be present in to be usable.
    #[serde(default = "default_min_feature_coverage")]
    pub min_feature_coverage: f64,
}

/// Thresholds used by the rule-based insight templates.
#[derive(Debug, Clone, Deserialize)]
pub struct InsightConfig {
    /// |change %| below this is "small".
    #[serde(default = "default_small_change_pct")]
    pub small_change_pct: f64,
    /// |change %| at or above this is "large".
    #[serde(default = "default_large_change_pct")]
    pub large_change_pct: f64,
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,
    #[serde(default = "default_medium_confidence")]
    pub medium_confidence: f64,
    /// Holdout R² below this gets a "validate before acting" recommendation.
    #[serde(default = "default_trusted_model_quality")]
    pub trusted_model_quality: f64,
}

// Default functions
fn default_lookback_days() -> u32 {
    30
}
fn default_min_rows() -> usize {
    1
}
fn default_min_samples() -> usize {
    10
}
fn default_significance_weight() -> f64 {
    0.7
}
fn default_low_confidence_cap() -> f64 {
    0.4
}
fn default_n_estimators() -> usize {
    100
}
fn default_learning_rate() -> f64 {
    0.1
}
fn default_max_depth() -> usize {
    3
}
fn default_min_samples_leaf() -> usize {
    2
}
fn default_holdout_fraction() -> f64 {
    0.2
}
fn default_seed() -> u64 {
    42
}
fn default_min_model_quality() -> f64 {
    0.15
}
fn default_min_rows_for_model() -> usize {
    20
}
fn default_shap_max_samples() -> usize {
    500
}
fn default_min_feature_coverage() -> f64 {
    0.5
}
fn default_small_change_pct() -> f64 {
    5.0
}
fn default_large_change_pct() -> f64 {
    20.0
}
fn default_high_confidence() -> f64 {
    0.7
}
fn default_medium_confidence() -> f64 {
    0.4
}
fn default_trusted_model_quality() -> f64 {
    0.5
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            min_rows: default_min_rows(),
            min_samples: default_min_samples(),
            significance_weight: default_significance_weight(),
            low_confidence_cap: default_low_confidence_cap(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            learning_rate: default_learning_rate(),
            max_depth: default_max_depth(),
            min_samples_leaf: default_min_samples_leaf(),
            holdout_fraction: default_holdout_fraction(),
            seed: default_seed(),
            min_model_quality: default_min_model_quality(),
            min_rows_for_model: default_min_rows_for_model(),
            shap_max_samples: default_shap_max_samples(),
            min_feature_coverage: default_min_feature_coverage(),
        }
    }
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            small_change_pct: default_small_change_pct(),
            large_change_pct: default_large_change_pct(),
            high_confidence: default_high_confidence(),
            medium_confidence: default_medium_confidence(),
            trusted_model_quality: default_trusted_model_quality(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::build(None)
    }

    /// Load configuration from a TOML file, with environment variables
    /// taking precedence.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Self::build(Some(path))
    }

    fn build(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_RCA")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        Ok(config.validated())
    }

    /// Clamp out-of-range settings to usable values.
    pub fn validated(mut self) -> Self {
        let analysis = &mut self.analysis;
        if analysis.lookback_days == 0 {
            warn!("analysis.lookback_days must be positive, using 1");
            analysis.lookback_days = 1;
        }
        if analysis.min_rows == 0 {
            analysis.min_rows = 1;
        }
        if analysis.min_samples == 0 {
            warn!("analysis.min_samples must be positive, using 1");
            analysis.min_samples = 1;
        }
        analysis.significance_weight = analysis.significance_weight.clamp(0.0, 1.0);
        analysis.low_confidence_cap = analysis.low_confidence_cap.clamp(0.0, 1.0);

        let drivers = &mut self.drivers;
        if !(1..=4).contains(&drivers.max_depth) {
            let clamped = drivers.max_depth.clamp(1, 4);
            warn!(
                requested = drivers.max_depth,
                using = clamped,
                "drivers.max_depth out of range"
            );
            drivers.max_depth = clamped;
        }
        drivers.n_estimators = drivers.n_estimators.max(1);
        drivers.min_samples_leaf = drivers.min_samples_leaf.max(1);
        drivers.shap_max_samples = drivers.shap_max_samples.max(1);
        if !(drivers.learning_rate > 0.0 && drivers.learning_rate <= 1.0) {
            warn!(requested = drivers.learning_rate, "drivers.learning_rate out of range, using 0.1");
            drivers.learning_rate = default_learning_rate();
        }
        drivers.holdout_fraction = drivers.holdout_fraction.clamp(0.05, 0.5);
        drivers.min_feature_coverage = drivers.min_feature_coverage.clamp(0.0, 1.0);
        self
    }
}
