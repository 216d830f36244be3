//! Driver analysis engine — ranks features by their influence on a target
//! metric, preferring the gradient-boosted model and falling back to
//! correlation when the model is unavailable or does not fit.

use crate::attributor::{
    Attribution, CorrelationAttributor, DriverAttributor, GradientBoostingAttributor, ModelError,
};
use crate::dataset::FeatureMatrix;
use campaign_core::config::{AppConfig, DriverConfig, InsightConfig};
use campaign_core::error::RcaResult;
use campaign_core::types::{
    CampaignRecord, DriverAnalysisResult, DriverMethod, FeatureDirection, FeatureImportance,
};
use campaign_insights::{InsightEnhancer, InsightSynthesizer, NoEnhancement};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DriverAnalysisEngine {
    config: DriverConfig,
    model: Arc<dyn DriverAttributor>,
    fallback: CorrelationAttributor,
    synthesizer: InsightSynthesizer,
    enhancer: Arc<dyn InsightEnhancer>,
}

impl DriverAnalysisEngine {
    pub fn new(config: DriverConfig, insights: InsightConfig) -> Self {
        Self {
            model: Arc::new(GradientBoostingAttributor::new(config.clone())),
            config,
            fallback: CorrelationAttributor,
            synthesizer: InsightSynthesizer::new(insights),
            enhancer: Arc::new(NoEnhancement),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.drivers.clone(), config.insights.clone())
    }

    /// Replace the model-path strategy.
    pub fn with_model(mut self, model: Arc<dyn DriverAttributor>) -> Self {
        self.model = model;
        self
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn InsightEnhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    /// Rank `feature_cols` and `categorical_cols` by their influence on
    /// `target_metric`.
    ///
    /// Model failures never surface here; they switch the result to the
    /// correlation method and record a `fallback_reason`.
    pub fn analyze_drivers(
        &self,
        records: &[CampaignRecord],
        target_metric: &str,
        feature_cols: &[&str],
        categorical_cols: &[&str],
    ) -> RcaResult<DriverAnalysisResult> {
        let data = FeatureMatrix::build(
            records,
            target_metric,
            feature_cols,
            categorical_cols,
            self.config.min_feature_coverage,
        )?;

        let (method, attribution, fallback_reason) = match self.run_model(&data) {
            Ok(attribution) => (self.model.method(), attribution, None),
            Err(err) => {
                warn!(
                    target = target_metric,
                    rows = data.n_rows(),
                    reason = %err,
                    "Model path unavailable, ranking drivers by correlation"
                );
                (
                    DriverMethod::Correlation,
                    self.fallback.rank(&data),
                    Some(err.to_string()),
                )
            }
        };

        let features = rank_features(&data.names, &attribution);
        let mut result = DriverAnalysisResult {
            target_metric: target_metric.to_string(),
            model_quality: attribution.model_quality.filter(|_| method == DriverMethod::Ml),
            features,
            method,
            rows_used: data.n_rows(),
            fallback_reason,
            insights: Vec::new(),
            recommendations: Vec::new(),
        };
        let synthesis = self.synthesizer.synthesize(&result);
        result.insights = synthesis.insights;
        result.recommendations = synthesis.recommendations;
        result.insights.extend(self.enhancer.enhance_drivers(&result));

        info!(
            target = target_metric,
            method = result.method.as_str(),
            model_quality = ?result.model_quality,
            top_driver = ?result.top_feature().map(|f| f.name.as_str()),
            rows = result.rows_used,
            "Driver analysis complete"
        );
        Ok(result)
    }

    fn run_model(&self, data: &FeatureMatrix) -> Result<Attribution, ModelError> {
        if !self.model.is_available() {
            return Err(ModelError::Unavailable);
        }
        if data.n_rows() < self.config.min_rows_for_model {
            return Err(ModelError::TooFewRows {
                rows: data.n_rows(),
                required: self.config.min_rows_for_model,
            });
        }
        let attribution = self.model.attribute(data)?;
        if attribution.importances.len() != data.n_features()
            || attribution.importances.iter().any(|v| !v.is_finite())
        {
            return Err(ModelError::NonFinite);
        }
        Ok(attribution)
    }
}

impl Default for DriverAnalysisEngine {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Sorted by importance descending, ties by name. Shares sum to 1; when
/// nothing carries importance the share is split evenly.
fn rank_features(names: &[String], attribution: &Attribution) -> Vec<FeatureImportance> {
    let total: f64 = attribution.importances.iter().sum();
    let even = 1.0 / names.len().max(1) as f64;
    let mut features: Vec<FeatureImportance> = names
        .iter()
        .zip(&attribution.importances)
        .zip(&attribution.directions)
        .map(|((name, &importance), &direction)| FeatureImportance {
            name: name.clone(),
            importance,
            importance_share: if total > 0.0 { importance / total } else { even },
            direction: FeatureDirection::of(direction),
        })
        .collect();
    features.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then_with(|| a.name.cmp(&b.name))
    });
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::error::RcaError;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn campaign(n: usize, signal: f64, seed: u64) -> Vec<CampaignRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let platforms = ["google", "meta", "tiktok"];
        (0..n)
            .map(|i| {
                let spend: f64 = rng.gen_range(100.0..1_000.0);
                let frequency: f64 = rng.gen_range(1.0..5.0);
                let bid: f64 = rng.gen_range(0.5..2.0);
                let noise: f64 = rng.gen_range(-20.0..20.0);
                CampaignRecord::new(start + chrono::Duration::days((i % 28) as i64))
                    .with_platform(platforms[i % 3])
                    .with_value("frequency", frequency)
                    .with_value("bid", bid)
                    .with_totals(spend, spend * 40.0, spend * 2.0, spend / 50.0, spend * 4.0)
                    .with_value("leads", signal * spend + noise)
            })
            .collect()
    }

    fn forced_correlation() -> DriverAnalysisEngine {
        let config = DriverConfig {
            min_rows_for_model: 10_000,
            ..DriverConfig::default()
        };
        DriverAnalysisEngine::new(config, InsightConfig::default())
    }

    struct Broken;

    impl DriverAttributor for Broken {
        fn method(&self) -> DriverMethod {
            DriverMethod::Ml
        }

        fn attribute(&self, _data: &FeatureMatrix) -> Result<Attribution, ModelError> {
            Err(ModelError::NonFinite)
        }
    }

    #[test]
    fn test_correlation_path_ranks_signal_first() {
        let records = campaign(120, 0.5, 3);
        let result = forced_correlation()
            .analyze_drivers(&records, "leads", &["spend", "frequency", "bid"], &[])
            .unwrap();

        assert_eq!(result.method, DriverMethod::Correlation);
        assert_eq!(result.model_quality, None);
        assert!(result.fallback_reason.as_deref().unwrap().contains("rows"));
        assert_eq!(result.top_feature().unwrap().name, "spend");
        assert_eq!(result.top_feature().unwrap().direction, FeatureDirection::Positive);
        let shares: f64 = result.features.iter().map(|f| f.importance_share).sum();
        assert!((shares - 1.0).abs() < 1e-12);
        assert_eq!(result.rows_used, 120);
    }

    #[cfg(feature = "gbt")]
    #[test]
    fn test_model_path_ranks_signal_first() {
        let records = campaign(200, 0.5, 3);
        let result = DriverAnalysisEngine::default()
            .analyze_drivers(&records, "leads", &["spend", "frequency", "bid"], &[])
            .unwrap();

        assert_eq!(result.method, DriverMethod::Ml);
        assert!(result.model_quality.unwrap() >= 0.15);
        assert_eq!(result.fallback_reason, None);
        assert_eq!(result.top_feature().unwrap().name, "spend");
        assert!(result.features.windows(2).all(|w| w[0].importance >= w[1].importance));
    }

    #[test]
    fn test_perfect_signal_ranks_first_against_noise() {
        let mut rng = StdRng::seed_from_u64(17);
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let records: Vec<CampaignRecord> = (0..200)
            .map(|i| {
                let sig: f64 = rng.gen_range(0.0..10.0);
                CampaignRecord::new(start + chrono::Duration::days((i % 28) as i64))
                    .with_value("sig", sig)
                    .with_value("n1", rng.gen_range(0.0..10.0))
                    .with_value("n2", rng.gen_range(0.0..10.0))
                    .with_value("n3", rng.gen_range(0.0..10.0))
                    .with_value("target", 3.0 * sig + 1.0)
            })
            .collect();
        let features = ["sig", "n1", "n2", "n3"];

        let fallback = forced_correlation()
            .analyze_drivers(&records, "target", &features, &[])
            .unwrap();
        assert_eq!(fallback.method, DriverMethod::Correlation);
        let top = fallback.top_feature().unwrap();
        assert_eq!(top.name, "sig");
        assert!((top.importance - 1.0).abs() < 1e-9);
        assert_eq!(top.direction, FeatureDirection::Positive);

        #[cfg(feature = "gbt")]
        {
            let ml = DriverAnalysisEngine::default()
                .analyze_drivers(&records, "target", &features, &[])
                .unwrap();
            assert_eq!(ml.method, DriverMethod::Ml);
            assert!(ml.model_quality.unwrap() > 0.9);
            assert_eq!(ml.top_feature().unwrap().name, "sig");
            assert_eq!(ml.top_feature().unwrap().direction, FeatureDirection::Positive);
        }
    }

    #[test]
    fn test_both_paths_share_a_shape() {
        let records = campaign(200, 0.5, 3);
        let features = ["spend", "frequency", "bid"];
        let ml = DriverAnalysisEngine::default()
            .analyze_drivers(&records, "leads", &features, &[])
            .unwrap();
        let fallback = forced_correlation()
            .analyze_drivers(&records, "leads", &features, &[])
            .unwrap();

        let keys = |r: &DriverAnalysisResult| {
            let value = serde_json::to_value(r).unwrap();
            let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        };
        assert_eq!(keys(&ml), keys(&fallback));
        assert_eq!(ml.features.len(), fallback.features.len());
    }

    #[cfg(feature = "gbt")]
    #[test]
    fn test_noise_target_falls_back() {
        let records = campaign(150, 0.0, 9);
        let result = DriverAnalysisEngine::default()
            .analyze_drivers(&records, "leads", &["spend", "frequency", "bid"], &[])
            .unwrap();
        assert_eq!(result.method, DriverMethod::Correlation);
        assert!(result.model_quality.is_none());
        assert!(result.fallback_reason.as_deref().unwrap().contains("R²"));
    }

    #[test]
    fn test_model_failure_is_recovered() {
        let records = campaign(60, 0.5, 5);
        let result = DriverAnalysisEngine::default()
            .with_model(Arc::new(Broken))
            .analyze_drivers(&records, "leads", &["spend", "bid"], &[])
            .unwrap();
        assert_eq!(result.method, DriverMethod::Correlation);
        assert_eq!(
            result.fallback_reason.as_deref(),
            Some("model produced non-finite attributions")
        );
        assert!(result
            .insights
            .iter()
            .any(|i| i.contains("correlational, not causal")));
    }

    #[test]
    fn test_categorical_platform_driver() {
        let records: Vec<CampaignRecord> = campaign(90, 0.0, 4)
            .into_iter()
            .map(|r| {
                let lift = match r.platform.as_deref() {
                    Some("google") => 300.0,
                    Some("meta") => 100.0,
                    _ => 0.0,
                };
                let leads = r.values["leads"] + lift;
                r.with_value("leads", leads)
            })
            .collect();
        let result = forced_correlation()
            .analyze_drivers(&records, "leads", &["frequency", "bid"], &["platform"])
            .unwrap();
        assert_eq!(result.top_feature().unwrap().name, "platform");
        assert_eq!(result.top_feature().unwrap().direction, FeatureDirection::Positive);
    }

    #[test]
    fn test_validation_errors_propagate() {
        let records = campaign(40, 0.5, 1);
        let engine = DriverAnalysisEngine::default();

        let err = engine
            .analyze_drivers(&records, "profit", &["spend", "bid"], &[])
            .unwrap_err();
        assert!(matches!(err, RcaError::UnknownMetric(_)));

        let err = engine
            .analyze_drivers(&records, "leads", &["leads", "bid"], &[])
            .unwrap_err();
        assert!(matches!(err, RcaError::InsufficientFeatures { found: 1, .. }));
    }

    #[test]
    fn test_enhancer_appends_to_driver_insights() {
        struct Note;
        impl InsightEnhancer for Note {
            fn enhance_drivers(&self, result: &DriverAnalysisResult) -> Vec<String> {
                vec![format!("{} rows analyzed.", result.rows_used)]
            }
        }

        let records = campaign(50, 0.5, 2);
        let result = forced_correlation()
            .with_enhancer(Arc::new(Note))
            .analyze_drivers(&records, "leads", &["spend", "frequency"], &[])
            .unwrap();
        assert_eq!(result.insights.last().unwrap(), "50 rows analyzed.");
    }

    #[test]
    fn test_repeat_runs_are_identical() {
        let records = campaign(100, 0.5, 8);
        let engine = DriverAnalysisEngine::default();
        let features = ["spend", "frequency", "bid"];
        let a = engine.analyze_drivers(&records, "leads", &features, &[]).unwrap();
        let b = engine.analyze_drivers(&records, "leads", &features, &[]).unwrap();
        assert_eq!(a, b);
    }
}
