//! Decomposition engine — splits a metric's change between two windows into
//! additive component contributions that sum exactly to the total change.
//!
//! Multiplicative metrics use first-order attribution around the "before"
//! point: each component's impact is the partial derivative of the metric
//! with respect to its factor, times the factor's delta, with every other
//! factor held at its before value. The second-order remainder goes to the
//! largest defined component. Spend is additive and decomposes into exact
//! per-platform deltas.

use crate::confidence::ConfidenceScorer;
use crate::period::{ensure_usable, PeriodWindow};
use campaign_core::config::{AnalysisConfig, InsightConfig};
use campaign_core::error::RcaResult;
use campaign_core::metrics::{Metric, MetricShape, MetricSpec, Totals};
use campaign_core::types::{
    AnalysisWarning, CampaignRecord, CausalBreakdownResult, ComponentContribution, Direction,
    Period, UNASSIGNED,
};
use campaign_insights::InsightSynthesizer;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Raw decomposition of one metric change, before scoring and synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub before_value: f64,
    pub after_value: f64,
    pub total_change: f64,
    pub total_change_pct: Option<f64>,
    pub components: Vec<ComponentContribution>,
    pub primary_driver: Option<String>,
    pub warnings: Vec<AnalysisWarning>,
    pub before_rows: usize,
    pub after_rows: usize,
}

#[derive(Debug, Clone)]
pub struct DecompositionEngine {
    scorer: ConfidenceScorer,
    synthesizer: InsightSynthesizer,
}

impl DecompositionEngine {
    pub fn new(scorer: ConfidenceScorer, synthesizer: InsightSynthesizer) -> Self {
        Self {
            scorer,
            synthesizer,
        }
    }

    pub fn from_config(analysis: &AnalysisConfig, insights: &InsightConfig) -> Self {
        Self::new(
            ConfidenceScorer::from_config(analysis),
            InsightSynthesizer::new(insights.clone()),
        )
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    pub fn synthesizer(&self) -> &InsightSynthesizer {
        &self.synthesizer
    }

    /// Decompose the change in `metric` from `before` to `after`.
    ///
    /// Fails with `InsufficientData` when either window has no row carrying
    /// every field the metric needs.
    pub fn decompose(
        &self,
        metric: Metric,
        before: &PeriodWindow<'_>,
        after: &PeriodWindow<'_>,
    ) -> RcaResult<CausalBreakdownResult> {
        ensure_usable(metric.spec(), before, after)?;
        Ok(self.decompose_segment(metric, before, after))
    }

    /// Decompose without the usable-row check, so that a segment missing
    /// from one window still yields a (degenerate) result.
    pub(crate) fn decompose_segment(
        &self,
        metric: Metric,
        before: &PeriodWindow<'_>,
        after: &PeriodWindow<'_>,
    ) -> CausalBreakdownResult {
        let spec = metric.spec();
        let decomposition = decompose_windows(spec, before, after);

        let mut confidence = self
            .scorer
            .score(&before.row_values(metric), &after.row_values(metric));
        let degenerate = decomposition
            .components
            .iter()
            .any(|c| c.absolute_value.is_none());
        if degenerate {
            confidence.score = confidence.score.min(self.scorer.low_confidence_cap());
            confidence.low_confidence = true;
        }

        for warning in &decomposition.warnings {
            let AnalysisWarning::DegenerateDivision { component, period } = warning;
            warn!(
                metric = spec.name,
                component = component.as_str(),
                period = ?period,
                "Zero or undefined factor, component reported as null"
            );
        }

        let mut result = CausalBreakdownResult {
            metric: spec.name.to_string(),
            before_value: decomposition.before_value,
            after_value: decomposition.after_value,
            total_change: decomposition.total_change,
            total_change_pct: decomposition.total_change_pct,
            primary_driver: decomposition.primary_driver,
            components: decomposition.components,
            confidence: confidence.score,
            low_confidence: confidence.low_confidence,
            before_rows: decomposition.before_rows,
            after_rows: decomposition.after_rows,
            warnings: decomposition.warnings,
            segment: None,
            insights: Vec::new(),
            recommendations: Vec::new(),
        };
        self.resynthesize(&mut result);

        debug!(
            metric = spec.name,
            total_change = result.total_change,
            primary_driver = ?result.primary_driver,
            confidence = result.confidence,
            "Decomposed metric change"
        );
        result
    }

    /// Regenerate insights and recommendations after the result changed.
    pub(crate) fn resynthesize(&self, result: &mut CausalBreakdownResult) {
        let synthesis = self.synthesizer.synthesize(&*result);
        result.insights = synthesis.insights;
        result.recommendations = synthesis.recommendations;
    }
}

/// Pure decomposition of `spec` between two windows.
pub fn decompose_windows(
    spec: &MetricSpec,
    before: &PeriodWindow<'_>,
    after: &PeriodWindow<'_>,
) -> Decomposition {
    let b = before.aggregate(spec);
    let a = after.aggregate(spec);
    let before_value = spec.metric.value(&b.totals);
    let after_value = spec.metric.value(&a.totals);
    let total_change = after_value - before_value;

    let (names, values, warnings) = match spec.shape {
        MetricShape::Multiplicative { scale } => {
            let (values, warnings) = multiplicative_impacts(spec, scale, &b.totals, &a.totals);
            let names = spec.components.iter().map(|c| c.name.to_string()).collect();
            (names, values, warnings)
        }
        MetricShape::Additive => {
            let (names, values) = platform_deltas(spec, before, after);
            (names, values, Vec::new())
        }
    };
    let values = assign_residual(values, total_change);

    let components = contributions(names, &values);
    let primary_driver = primary_driver(&components);
    let total_change_pct = (before_value.abs() > 0.0).then(|| total_change / before_value.abs() * 100.0);

    Decomposition {
        before_value,
        after_value,
        total_change,
        total_change_pct,
        components,
        primary_driver,
        warnings,
        before_rows: b.usable_rows,
        after_rows: a.usable_rows,
    }
}

/// Linear impact of each factor around the before point; `None` where a
/// factor is zero or undefined in either window.
fn multiplicative_impacts(
    spec: &MetricSpec,
    scale: f64,
    before: &Totals,
    after: &Totals,
) -> (Vec<Option<f64>>, Vec<AnalysisWarning>) {
    let base: Vec<Option<f64>> = spec
        .components
        .iter()
        .map(|c| c.factor.value(before))
        .collect();

    let mut impacts = Vec::with_capacity(spec.components.len());
    let mut warnings = Vec::new();

    for (i, component) in spec.components.iter().enumerate() {
        let f0 = usable_factor(base[i]);
        let f1 = usable_factor(component.factor.value(after));
        let degenerate_period = match (f0, f1) {
            (None, None) => Some(Period::Both),
            (None, Some(_)) => Some(Period::Before),
            (Some(_), None) => Some(Period::After),
            (Some(_), Some(_)) => None,
        };
        if let Some(period) = degenerate_period {
            warnings.push(AnalysisWarning::DegenerateDivision {
                component: component.name.to_string(),
                period,
            });
            impacts.push(None);
            continue;
        }
        let (f0, f1) = (f0.unwrap_or_default(), f1.unwrap_or_default());

        let mut partial = scale * f64::from(component.exponent) * f0.powi(component.exponent - 1);
        for (j, other) in spec.components.iter().enumerate() {
            if j != i {
                partial *= base[j].unwrap_or(f64::NAN).powi(other.exponent);
            }
        }
        let impact = partial * (f1 - f0);

        if impact.is_finite() {
            impacts.push(Some(impact));
        } else {
            warnings.push(AnalysisWarning::DegenerateDivision {
                component: component.name.to_string(),
                period: Period::Before,
            });
            impacts.push(None);
        }
    }

    (impacts, warnings)
}

fn usable_factor(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

/// Exact per-platform spend deltas, ordered by platform name.
fn platform_deltas(
    spec: &MetricSpec,
    before: &PeriodWindow<'_>,
    after: &PeriodWindow<'_>,
) -> (Vec<String>, Vec<Option<f64>>) {
    let mut by_platform: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    let platform = |r: &CampaignRecord| r.platform.clone().unwrap_or_else(|| UNASSIGNED.to_string());

    for record in before.usable_records(spec) {
        by_platform.entry(platform(record)).or_default().0 += spec.metric.value(&Totals::from_record(record));
    }
    for record in after.usable_records(spec) {
        by_platform.entry(platform(record)).or_default().1 += spec.metric.value(&Totals::from_record(record));
    }

    by_platform
        .into_iter()
        .map(|(name, (b, a))| (name, Some(a - b)))
        .unzip()
}

/// Add `total - Σ defined` to the defined value of largest magnitude so the
/// defined values sum exactly to `total`.
fn assign_residual(mut values: Vec<Option<f64>>, total: f64) -> Vec<Option<f64>> {
    let mut largest: Option<usize> = None;
    for (i, value) in values.iter().enumerate() {
        if let Some(v) = value {
            let beats = match largest.and_then(|j| values[j]) {
                Some(best) => v.abs() > best.abs(),
                None => true,
            };
            if beats {
                largest = Some(i);
            }
        }
    }

    if let Some(i) = largest {
        let explained: f64 = values.iter().flatten().sum();
        let residual = total - explained;
        if let Some(v) = values[i].as_mut() {
            *v += residual;
        }
    }
    values
}

fn contributions(names: Vec<String>, values: &[Option<f64>]) -> Vec<ComponentContribution> {
    let base: f64 = values.iter().flatten().sum();
    names
        .into_iter()
        .zip(values.iter())
        .map(|(name, value)| {
            let percent_of_total = value.map(|v| {
                if base.abs() > 1e-12 {
                    v / base * 100.0
                } else {
                    0.0
                }
            });
            ComponentContribution {
                name,
                absolute_value: *value,
                percent_of_total,
                direction: value.map(Direction::of).unwrap_or(Direction::Flat),
            }
        })
        .collect()
}

fn primary_driver(components: &[ComponentContribution]) -> Option<String> {
    let mut best: Option<(&str, f64)> = None;
    for component in components {
        if let Some(value) = component.absolute_value {
            if best.map_or(true, |(_, b)| value.abs() > b) {
                best = Some((component.name.as_str(), value.abs()));
            }
        }
    }
    best.filter(|(_, magnitude)| *magnitude > 1e-12)
        .map(|(name, _)| name.to_string())
}
