//! Deterministic insight templates keyed on the leading component or feature,
//! the size of the change, and the confidence level.

use campaign_core::config::InsightConfig;
use campaign_core::metrics::Metric;
use campaign_core::types::{
    CausalBreakdownResult, ComponentContribution, DriverAnalysisResult, DriverMethod,
    FeatureDirection, FeatureImportance,
};
use serde::{Deserialize, Serialize};

const MAX_INSIGHTS: usize = 5;
const MAX_RECOMMENDATIONS: usize = 3;

/// Statements and ranked recommendations for one result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Small,
    Moderate,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl Magnitude {
    fn label(&self) -> &'static str {
        match self {
            Magnitude::Small => "small",
            Magnitude::Moderate => "moderate",
            Magnitude::Large => "large",
        }
    }
}

impl ConfidenceLevel {
    fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// A result type the synthesizer can describe.
pub trait Explainable {
    fn explain(&self, synthesizer: &InsightSynthesizer) -> Synthesis;
}

impl Explainable for CausalBreakdownResult {
    fn explain(&self, synthesizer: &InsightSynthesizer) -> Synthesis {
        synthesizer.breakdown(self)
    }
}

impl Explainable for DriverAnalysisResult {
    fn explain(&self, synthesizer: &InsightSynthesizer) -> Synthesis {
        synthesizer.drivers(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsightSynthesizer {
    config: InsightConfig,
}

impl InsightSynthesizer {
    pub fn new(config: InsightConfig) -> Self {
        Self { config }
    }

    pub fn synthesize<T: Explainable + ?Sized>(&self, result: &T) -> Synthesis {
        result.explain(self)
    }

    pub fn magnitude(&self, change_pct: Option<f64>) -> Magnitude {
        match change_pct.map(f64::abs) {
            Some(pct) if pct < self.config.small_change_pct => Magnitude::Small,
            Some(pct) if pct < self.config.large_change_pct => Magnitude::Moderate,
            // A change away from a zero baseline counts as large.
            _ => Magnitude::Large,
        }
    }

    pub fn confidence_level(&self, confidence: f64) -> ConfidenceLevel {
        if confidence >= self.config.high_confidence {
            ConfidenceLevel::High
        } else if confidence >= self.config.medium_confidence {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    // ─── Breakdown ──────────────────────────────────────────────────────

    pub fn breakdown(&self, result: &CausalBreakdownResult) -> Synthesis {
        let metric = result.metric.parse::<Metric>().ok();
        let level = self.confidence_level(result.confidence);
        let scope = match &result.segment {
            Some(segment) => format!("[{}={}] ", segment.dimension, segment.value),
            None => String::new(),
        };

        let mut insights = vec![self.headline(result, &scope)];

        let primary = result
            .primary_driver
            .as_deref()
            .and_then(|name| result.component(name));
        if let Some(primary) = primary {
            insights.push(format!(
                "{} was the primary driver, accounting for {:.0}% of the change ({}).",
                primary.name,
                primary.percent_of_total.unwrap_or(0.0),
                signed(primary.absolute_value.unwrap_or(0.0)),
            ));
        }

        let secondary = secondary_component(result);
        if let Some(secondary) = secondary {
            let value = secondary.absolute_value.unwrap_or(0.0);
            let verb = if value.signum() == result.total_change.signum() {
                "reinforced"
            } else {
                "partially offset"
            };
            insights.push(format!(
                "{} {} the change by {}.",
                secondary.name,
                verb,
                signed(value)
            ));
        }

        let degenerate: Vec<&str> = result
            .components
            .iter()
            .filter(|c| c.absolute_value.is_none())
            .map(|c| c.name.as_str())
            .collect();
        if !degenerate.is_empty() {
            insights.push(format!(
                "{} could not be computed because a factor was zero in one period.",
                degenerate.join(", ")
            ));
        }

        let mut confidence_line = format!(
            "Confidence in this breakdown is {} ({:.2}).",
            level.label(),
            result.confidence
        );
        if level == ConfidenceLevel::Low {
            confidence_line.push_str(" Treat it as directional only.");
        }
        insights.push(confidence_line);
        insights.truncate(MAX_INSIGHTS);

        let mut recommendations = Vec::new();
        match (primary, metric) {
            // The defined component also carries the null components' share,
            // so a component-specific action would target the wrong lever.
            (Some(primary), _) if !degenerate.is_empty() => recommendations.push(format!(
                "Check the zero-valued inputs behind {} before acting; {} also absorbs the change they could not explain.",
                degenerate.join(", "),
                primary.name
            )),
            (Some(primary), Some(metric)) => {
                recommendations.push(component_recommendation(metric, primary, result));
            }
            (Some(primary), None) => recommendations.push(format!(
                "Investigate {}, the largest contributor to the {} change.",
                primary.name, result.metric
            )),
            (None, _) => recommendations.push(
                "No component could be attributed; widen the date range or check for zero-valued inputs."
                    .to_string(),
            ),
        }
        if let Some(secondary) = secondary {
            let value = secondary.absolute_value.unwrap_or(0.0);
            if value.signum() != result.total_change.signum() {
                recommendations.push(format!(
                    "Look into {}, which moved against the overall trend.",
                    secondary.name
                ));
            }
        }
        if level == ConfidenceLevel::Low || result.low_confidence {
            recommendations.push(
                "Collect more data or widen the date range before acting on this breakdown."
                    .to_string(),
            );
        }
        recommendations.truncate(MAX_RECOMMENDATIONS);

        Synthesis {
            insights,
            recommendations,
        }
    }

    fn headline(&self, result: &CausalBreakdownResult, scope: &str) -> String {
        if result.total_change.abs() < 1e-12 {
            return format!(
                "{}{} was flat at {}.",
                scope,
                result.metric,
                fmt_value(result.after_value)
            );
        }
        let verb = if result.total_change > 0.0 {
            "increased"
        } else {
            "decreased"
        };
        match result.total_change_pct {
            Some(pct) => format!(
                "{}{} {} by {:.1}% ({} to {}), a {} change.",
                scope,
                result.metric,
                verb,
                pct.abs(),
                fmt_value(result.before_value),
                fmt_value(result.after_value),
                self.magnitude(Some(pct)).label(),
            ),
            None => format!(
                "{}{} {} from a zero baseline to {}.",
                scope,
                result.metric,
                verb,
                fmt_value(result.after_value)
            ),
        }
    }

    // ─── Drivers ────────────────────────────────────────────────────────

    pub fn drivers(&self, result: &DriverAnalysisResult) -> Synthesis {
        let mut insights = Vec::new();
        let mut recommendations = Vec::new();
        let target = &result.target_metric;

        match result.top_feature() {
            Some(top) => {
                insights.push(format!(
                    "{} is the strongest driver of {} ({:.0}% of total importance, {} relationship).",
                    top.name,
                    target,
                    top.importance_share * 100.0,
                    direction_label(top.direction),
                ));
                for (rank, feature) in result.features.iter().enumerate().skip(1).take(2) {
                    insights.push(format!(
                        "{} ranks #{} ({:.0}%, {}).",
                        feature.name,
                        rank + 1,
                        feature.importance_share * 100.0,
                        direction_label(feature.direction),
                    ));
                }
                recommendations.push(driver_recommendation(top, target));
            }
            None => {
                insights.push(format!("No driver of {} could be ranked.", target));
                recommendations
                    .push("Add more feature columns or rows and rerun the analysis.".to_string());
            }
        }

        match (result.method, result.model_quality) {
            (DriverMethod::Ml, Some(r2)) => insights.push(format!(
                "Ranking is based on a gradient-boosted model with holdout R² of {:.2}.",
                r2
            )),
            _ => insights.push(format!(
                "Ranking is based on Pearson correlation with {}; relationships are correlational, not causal.",
                target
            )),
        }
        if let Some(reason) = &result.fallback_reason {
            insights.push(format!("The model path was not used: {}.", reason));
        }
        insights.truncate(MAX_INSIGHTS);

        if let Some(second) = result.features.get(1) {
            if second.importance_share >= 0.2 {
                recommendations.push(format!(
                    "Track {} alongside the top driver; it carries {:.0}% of the importance.",
                    second.name,
                    second.importance_share * 100.0
                ));
            }
        }
        let weak_model = result
            .model_quality
            .map(|r2| r2 < self.config.trusted_model_quality)
            .unwrap_or(true);
        if weak_model {
            recommendations.push(
                "Validate the top drivers with a controlled test before reallocating budget."
                    .to_string(),
            );
        }
        recommendations.truncate(MAX_RECOMMENDATIONS);

        Synthesis {
            insights,
            recommendations,
        }
    }
}

/// Largest defined non-primary component carrying at least 10% of the change.
fn secondary_component(result: &CausalBreakdownResult) -> Option<&ComponentContribution> {
    let primary = result.primary_driver.as_deref();
    result
        .components
        .iter()
        .filter(|c| Some(c.name.as_str()) != primary)
        .filter(|c| c.percent_of_total.map(|p| p.abs() >= 10.0).unwrap_or(false))
        .max_by(|a, b| {
            let a = a.absolute_value.unwrap_or(0.0).abs();
            let b = b.absolute_value.unwrap_or(0.0).abs();
            a.total_cmp(&b)
        })
}

/// `Some(true)` when a rise in the metric is good news.
fn higher_is_better(metric: Metric) -> Option<bool> {
    match metric {
        Metric::Roas | Metric::Ctr | Metric::Cvr | Metric::Revenue => Some(true),
        Metric::Cpa | Metric::Cpc | Metric::Cpm => Some(false),
        Metric::Spend => None,
    }
}

fn component_recommendation(
    metric: Metric,
    primary: &ComponentContribution,
    result: &CausalBreakdownResult,
) -> String {
    let value = primary.absolute_value.unwrap_or(0.0);
    let favorable = match higher_is_better(metric) {
        Some(true) => value > 0.0,
        Some(false) => value < 0.0,
        None => {
            return format!(
                "Review the {} budget change; it accounts for {:.0}% of the spend movement.",
                primary.name,
                primary.percent_of_total.unwrap_or(0.0)
            );
        }
    };

    let text = match (primary.name.as_str(), metric, favorable) {
        ("Conversion Volume", _, true) => {
            "Scale the campaigns and audiences that delivered the additional conversions."
        }
        ("Conversion Volume", _, false) => {
            "Audit conversion tracking and landing pages; conversion volume fell."
        }
        ("Average Order Value (AOV)", _, true) => {
            "Keep the bundles, upsells or pricing that lifted average order value."
        }
        ("Average Order Value (AOV)", _, false) => {
            "Review discounting and product mix; average order value declined."
        }
        ("Spend Efficiency", _, true) => {
            "Spend came down without a proportional revenue loss; hold budgets at the new level and monitor."
        }
        ("Spend Efficiency", _, false) => {
            "Spend grew faster than returns; shift budget away from the lowest-ROAS platforms."
        }
        ("CPC contribution", _, true) => {
            "Lower click costs drove the improvement; keep the current bidding strategy."
        }
        ("CPC contribution", _, false) => {
            "Rising click costs pushed CPA up; review bid caps and auction competition."
        }
        ("CVR contribution", _, true) => {
            "A better conversion rate lowered CPA; roll the landing-page and creative changes out more widely."
        }
        ("CVR contribution", _, false) => {
            "Conversion rate fell; test landing pages and check the checkout funnel."
        }
        ("Click Volume", Metric::Ctr, true) => {
            "Creative engagement improved; reuse the winning ad variants."
        }
        ("Click Volume", Metric::Ctr, false) => {
            "Refresh creatives and tighten targeting to recover click-through."
        }
        ("Click Volume", Metric::Cvr, true) => {
            "Fewer but better-qualified clicks lifted CVR; keep the tighter targeting."
        }
        ("Click Volume", Metric::Cvr, false) => {
            "Traffic grew faster than conversions; check the quality of newly added traffic sources."
        }
        ("Click Volume", _, true) => {
            "More clicks for the same money; keep scaling the efficient placements."
        }
        ("Click Volume", _, false) => {
            "Click volume fell relative to spend; review placements and bids."
        }
        ("Impression Volume", Metric::Ctr, true) => {
            "Fewer low-value impressions improved CTR; keep pruning weak placements."
        }
        ("Impression Volume", Metric::Ctr, false) => {
            "Impressions grew without matching clicks; prune low-engagement placements."
        }
        ("Impression Volume", _, true) => "More impressions per dollar; inventory costs eased.",
        ("Impression Volume", _, false) => {
            "Impression volume dropped relative to spend; check inventory competition and frequency caps."
        }
        ("Spend Change", _, true) => {
            "Lower spend reduced unit costs; confirm volume targets are still met."
        }
        ("Spend Change", _, false) => {
            "Spend rose faster than delivered volume; review budget pacing."
        }
        _ => {
            return format!(
                "Investigate {}, the largest contributor to the {} change.",
                primary.name, result.metric
            );
        }
    };
    text.to_string()
}

fn driver_recommendation(top: &FeatureImportance, target: &str) -> String {
    match top.direction {
        FeatureDirection::Positive => format!(
            "Prioritize {}: higher values go with higher {}.",
            top.name, target
        ),
        FeatureDirection::Negative => format!(
            "Watch {}: higher values go with lower {}.",
            top.name, target
        ),
        FeatureDirection::Neutral => format!(
            "Segment by {} to understand its non-linear effect on {}.",
            top.name, target
        ),
    }
}

fn direction_label(direction: FeatureDirection) -> &'static str {
    match direction {
        FeatureDirection::Positive => "positive",
        FeatureDirection::Negative => "negative",
        FeatureDirection::Neutral => "mixed",
    }
}

fn fmt_value(value: f64) -> String {
    if value.abs() >= 100.0 {
        format!("{:.0}", value)
    } else if value.abs() >= 1.0 {
        format!("{:.2}", value)
    } else {
        format!("{:.4}", value)
    }
}

fn signed(value: f64) -> String {
    if value >= 0.0 {
        format!("+{}", fmt_value(value))
    } else {
        format!("-{}", fmt_value(value.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::{Direction, SegmentShare};

    fn contribution(name: &str, value: Option<f64>, pct: Option<f64>) -> ComponentContribution {
        ComponentContribution {
            name: name.to_string(),
            absolute_value: value,
            percent_of_total: pct,
            direction: value.map(Direction::of).unwrap_or(Direction::Flat),
        }
    }

    fn roas_result(confidence: f64) -> CausalBreakdownResult {
        CausalBreakdownResult {
            metric: "ROAS".to_string(),
            before_value: 1.5,
            after_value: 1.8,
            total_change: 0.3,
            total_change_pct: Some(20.0),
            primary_driver: Some("Conversion Volume".to_string()),
            components: vec![
                contribution("Conversion Volume", Some(0.3), Some(100.0)),
                contribution("Average Order Value (AOV)", Some(0.0), Some(0.0)),
                contribution("Spend Efficiency", Some(0.0), Some(0.0)),
            ],
            confidence,
            low_confidence: confidence < 0.4,
            before_rows: 30,
            after_rows: 30,
            warnings: vec![],
            segment: None,
            insights: vec![],
            recommendations: vec![],
        }
    }

    fn driver_result(method: DriverMethod, quality: Option<f64>) -> DriverAnalysisResult {
        DriverAnalysisResult {
            target_metric: "revenue".to_string(),
            model_quality: quality,
            features: vec![
                FeatureImportance {
                    name: "spend".to_string(),
                    importance: 0.9,
                    importance_share: 0.75,
                    direction: FeatureDirection::Positive,
                },
                FeatureImportance {
                    name: "noise".to_string(),
                    importance: 0.3,
                    importance_share: 0.25,
                    direction: FeatureDirection::Neutral,
                },
            ],
            method,
            rows_used: 120,
            fallback_reason: None,
            insights: vec![],
            recommendations: vec![],
        }
    }

    #[test]
    fn test_magnitude_buckets() {
        let synth = InsightSynthesizer::default();
        assert_eq!(synth.magnitude(Some(2.0)), Magnitude::Small);
        assert_eq!(synth.magnitude(Some(-12.0)), Magnitude::Moderate);
        assert_eq!(synth.magnitude(Some(20.0)), Magnitude::Large);
        assert_eq!(synth.magnitude(None), Magnitude::Large);
    }

    #[test]
    fn test_confidence_levels() {
        let synth = InsightSynthesizer::default();
        assert_eq!(synth.confidence_level(0.9), ConfidenceLevel::High);
        assert_eq!(synth.confidence_level(0.5), ConfidenceLevel::Medium);
        assert_eq!(synth.confidence_level(0.1), ConfidenceLevel::Low);
    }

    #[test]
    fn test_breakdown_statements_and_recommendations() {
        let synth = InsightSynthesizer::default();
        let synthesis = synth.synthesize(&roas_result(0.85));

        assert!((2..=5).contains(&synthesis.insights.len()));
        assert!((1..=3).contains(&synthesis.recommendations.len()));
        assert!(synthesis.insights[0].contains("ROAS increased by 20.0%"));
        assert!(synthesis.insights[0].contains("large"));
        assert!(synthesis.insights[1].starts_with("Conversion Volume was the primary driver"));
        assert!(synthesis.recommendations[0].contains("additional conversions"));
    }

    #[test]
    fn test_low_confidence_adds_caveat() {
        let synth = InsightSynthesizer::default();
        let synthesis = synth.synthesize(&roas_result(0.2));
        assert!(synthesis.insights.iter().any(|s| s.contains("directional")));
        assert!(synthesis
            .recommendations
            .last()
            .unwrap()
            .contains("Collect more data"));
    }

    #[test]
    fn test_degenerate_component_is_reported() {
        let synth = InsightSynthesizer::default();
        let mut result = roas_result(0.4);
        result.metric = "CTR".to_string();
        result.primary_driver = Some("Impression Volume".to_string());
        result.components = vec![
            contribution("Click Volume", None, None),
            contribution("Impression Volume", Some(0.3), Some(100.0)),
        ];
        let synthesis = synth.synthesize(&result);
        assert!(synthesis
            .insights
            .iter()
            .any(|s| s.starts_with("Click Volume could not be computed")));
    }

    #[test]
    fn test_degenerate_breakdown_skips_component_action() {
        let synth = InsightSynthesizer::default();
        let mut result = roas_result(0.4);
        result.metric = "CTR".to_string();
        result.primary_driver = Some("Impression Volume".to_string());
        result.components = vec![
            contribution("Click Volume", None, None),
            contribution("Impression Volume", Some(0.3), Some(100.0)),
        ];
        let synthesis = synth.synthesize(&result);
        assert!(synthesis.recommendations[0].starts_with("Check the zero-valued inputs behind Click Volume"));
        assert!(!synthesis
            .recommendations
            .iter()
            .any(|s| s.contains("placements")));
    }

    #[test]
    fn test_weak_model_threshold_uses_model_quality_setting() {
        let synth = InsightSynthesizer::default();
        let validate = |r2: f64| {
            synth
                .synthesize(&driver_result(DriverMethod::Ml, Some(r2)))
                .recommendations
                .iter()
                .any(|s| s.contains("controlled test"))
        };
        assert!(!validate(0.6));
        assert!(validate(0.3));
    }

    #[test]
    fn test_segment_scope_in_headline() {
        let synth = InsightSynthesizer::default();
        let mut result = roas_result(0.8);
        result.segment = Some(SegmentShare {
            dimension: "platform".to_string(),
            value: "google".to_string(),
            share_before: 0.5,
            share_after: 0.5,
            contribution_to_total: 0.15,
        });
        let synthesis = synth.synthesize(&result);
        assert!(synthesis.insights[0].starts_with("[platform=google] ROAS"));
    }

    #[test]
    fn test_no_primary_driver() {
        let synth = InsightSynthesizer::default();
        let mut result = roas_result(0.3);
        result.primary_driver = None;
        let synthesis = synth.synthesize(&result);
        assert!(synthesis.recommendations[0].starts_with("No component could be attributed"));
    }

    #[test]
    fn test_driver_synthesis_ml_and_correlation() {
        let synth = InsightSynthesizer::default();

        let ml = synth.synthesize(&driver_result(DriverMethod::Ml, Some(0.91)));
        assert!(ml.insights[0].starts_with("spend is the strongest driver of revenue"));
        assert!(ml.insights.iter().any(|s| s.contains("holdout R² of 0.91")));
        assert!(ml.recommendations[0].starts_with("Prioritize spend"));
        assert!(!ml.recommendations.iter().any(|s| s.contains("controlled test")));

        let mut fallback = driver_result(DriverMethod::Correlation, None);
        fallback.fallback_reason = Some("holdout R² 0.05 below 0.15".to_string());
        let corr = synth.synthesize(&fallback);
        assert!(corr.insights.iter().any(|s| s.contains("Pearson correlation")));
        assert!(corr.insights.iter().any(|s| s.contains("model path was not used")));
        assert!(corr.recommendations.iter().any(|s| s.contains("controlled test")));
        assert!((2..=5).contains(&corr.insights.len()));
        assert!((1..=3).contains(&corr.recommendations.len()));
    }

    #[test]
    fn test_signed_formatting() {
        assert_eq!(signed(0.3), "+0.3000");
        assert_eq!(signed(-20.0), "-20.00");
        assert_eq!(fmt_value(15_000.0), "15000");
    }
}
