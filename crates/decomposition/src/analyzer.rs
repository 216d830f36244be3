//! Causal analyzer — entry point that validates the metric, splits the rows
//! into periods and runs the decomposition or per-segment attribution.

use crate::attribution::{AttributionAnalyzer, Dimension};
use crate::decomposition::DecompositionEngine;
use crate::period::PeriodSplitter;
use campaign_core::config::AppConfig;
use campaign_core::error::RcaResult;
use campaign_core::metrics::MetricRegistry;
use campaign_core::types::{CampaignRecord, CausalBreakdownResult};
use campaign_insights::{InsightEnhancer, NoEnhancement};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct CausalAnalyzer {
    splitter: PeriodSplitter,
    engine: DecompositionEngine,
    attribution: AttributionAnalyzer,
    enhancer: Arc<dyn InsightEnhancer>,
}

impl CausalAnalyzer {
    pub fn new(splitter: PeriodSplitter, engine: DecompositionEngine) -> Self {
        Self {
            splitter,
            attribution: AttributionAnalyzer::new(engine.clone()),
            engine,
            enhancer: Arc::new(NoEnhancement),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            PeriodSplitter::from_config(&config.analysis),
            DecompositionEngine::from_config(&config.analysis, &config.insights),
        )
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn InsightEnhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    pub fn engine(&self) -> &DecompositionEngine {
        &self.engine
    }

    pub fn attribution(&self) -> &AttributionAnalyzer {
        &self.attribution
    }

    /// Explain the change in `metric` between the two periods around
    /// `split_date` (or the midpoint of the lookback range).
    pub fn analyze(
        &self,
        records: &[CampaignRecord],
        metric: &str,
        date_col: &str,
        split_date: Option<NaiveDate>,
    ) -> RcaResult<CausalBreakdownResult> {
        let spec = MetricRegistry::get_spec(metric)?;
        let (before, after) = self
            .splitter
            .split_for(spec, records, date_col, split_date)?;

        let mut result = self.engine.decompose(spec.metric, &before, &after)?;
        self.enhance(&mut result);

        info!(
            metric = spec.name,
            before = %before.start_date,
            split = %after.start_date,
            total_change = result.total_change,
            primary_driver = ?result.primary_driver,
            confidence = result.confidence,
            "Causal breakdown complete"
        );
        Ok(result)
    }

    /// Same as [`analyze`](Self::analyze), once per value of `dimension`.
    pub fn analyze_by(
        &self,
        records: &[CampaignRecord],
        metric: &str,
        date_col: &str,
        split_date: Option<NaiveDate>,
        dimension: &Dimension,
    ) -> RcaResult<Vec<CausalBreakdownResult>> {
        let spec = MetricRegistry::get_spec(metric)?;
        let (before, after) = self
            .splitter
            .split_for(spec, records, date_col, split_date)?;

        let mut results = self
            .attribution
            .attribute_by(spec.metric, &before, &after, dimension)?;
        for result in &mut results {
            self.enhance(result);
        }
        Ok(results)
    }

    fn enhance(&self, result: &mut CausalBreakdownResult) {
        let extra = self.enhancer.enhance_breakdown(result);
        result.insights.extend(extra);
    }
}

impl Default for CausalAnalyzer {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::error::RcaError;
    use campaign_core::types::DriverAnalysisResult;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn campaign(days: std::ops::RangeInclusive<u32>, conversions: f64) -> Vec<CampaignRecord> {
        days.map(|d| {
            let platform = if d % 2 == 0 { "google" } else { "meta" };
            CampaignRecord::new(day(d))
                .with_platform(platform)
                .with_totals(
                    1_000.0 + f64::from(d % 3) * 10.0,
                    20_000.0,
                    400.0,
                    conversions + f64::from(d % 4),
                    (conversions + f64::from(d % 4)) * 150.0,
                )
        })
        .collect()
    }

    struct Playbook;

    impl InsightEnhancer for Playbook {
        fn enhance_breakdown(&self, result: &CausalBreakdownResult) -> Vec<String> {
            vec![format!("Playbook entry for {}.", result.metric)]
        }

        fn enhance_drivers(&self, _result: &DriverAnalysisResult) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_unknown_metric_fails_before_touching_data() {
        let analyzer = CausalAnalyzer::default();
        let err = analyzer.analyze(&[], "FOO", "date", None).unwrap_err();
        assert!(matches!(err, RcaError::UnknownMetric(ref m) if m == "FOO"));

        let err = analyzer
            .analyze_by(&[], "FOO", "date", None, &Dimension::Platform)
            .unwrap_err();
        assert!(matches!(err, RcaError::UnknownMetric(_)));
    }

    #[test]
    fn test_conversion_lift_explains_roas() {
        let mut records = campaign(1..=14, 10.0);
        records.extend(campaign(15..=28, 14.0));
        let analyzer = CausalAnalyzer::default();

        let result = analyzer.analyze(&records, "roas", "date", Some(day(15))).unwrap();
        assert_eq!(result.metric, "ROAS");
        assert!(result.total_change > 0.0);
        assert_eq!(result.primary_driver.as_deref(), Some("Conversion Volume"));
        assert!((result.explained_change() - result.total_change).abs() < 1e-9);
        assert!(!result.insights.is_empty());
        assert!(result.before_rows == 14 && result.after_rows == 14);
    }

    #[test]
    fn test_small_windows_are_low_confidence() {
        let mut records = campaign(1..=3, 10.0);
        records.extend(campaign(4..=6, 20.0));
        let analyzer = CausalAnalyzer::default();

        let result = analyzer.analyze(&records, "ROAS", "date", Some(day(4))).unwrap();
        assert!(result.low_confidence);
        assert!(result.confidence <= 0.4);
    }

    #[test]
    fn test_enhancer_appends_to_insights() {
        let mut records = campaign(1..=14, 10.0);
        records.extend(campaign(15..=28, 14.0));
        let plain = CausalAnalyzer::default()
            .analyze(&records, "CTR", "date", None)
            .unwrap();
        let enhanced = CausalAnalyzer::default()
            .with_enhancer(Arc::new(Playbook))
            .analyze(&records, "CTR", "date", None)
            .unwrap();

        assert_eq!(enhanced.insights.len(), plain.insights.len() + 1);
        assert_eq!(enhanced.insights.last().unwrap(), "Playbook entry for CTR.");
        assert_eq!(enhanced.insights[..plain.insights.len()], plain.insights[..]);
    }

    #[test]
    fn test_analyze_by_platform() {
        let mut records = campaign(1..=14, 10.0);
        records.extend(campaign(15..=28, 14.0));
        let results = CausalAnalyzer::default()
            .analyze_by(&records, "cpa", "date", Some(day(15)), &Dimension::Platform)
            .unwrap();

        let mut platforms: Vec<&str> = results
            .iter()
            .map(|r| r.segment.as_ref().unwrap().value.as_str())
            .collect();
        platforms.sort();
        assert_eq!(platforms, vec!["google", "meta"]);
        assert!(results.iter().all(|r| r.metric == "CPA"));
    }

    #[test]
    fn test_repeat_analysis_is_identical() {
        let mut records = campaign(1..=14, 10.0);
        records.extend(campaign(15..=28, 12.0));
        let analyzer = CausalAnalyzer::default();
        let first = analyzer.analyze(&records, "CVR", "date", None).unwrap();
        let second = analyzer.analyze(&records, "CVR", "date", None).unwrap();
        assert_eq!(first, second);
    }
}
