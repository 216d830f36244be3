//! Attribution by dimension — reruns the decomposition per platform, channel
//! or custom dimension value, and reports each segment's mix-adjusted share
//! of the aggregate change.

use crate::decomposition::DecompositionEngine;
use crate::period::{ensure_usable, PeriodWindow};
use campaign_core::error::RcaResult;
use campaign_core::metrics::{safe_div, Metric};
use campaign_core::types::{CampaignRecord, CausalBreakdownResult, SegmentShare, UNASSIGNED};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Categorical dimension to segment rows by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Platform,
    Channel,
    Custom(String),
}

impl Dimension {
    pub fn name(&self) -> &str {
        match self {
            Dimension::Platform => "platform",
            Dimension::Channel => "channel",
            Dimension::Custom(name) => name,
        }
    }

    /// The row's value for this dimension, or `(unassigned)`.
    pub fn value_of<'r>(&self, record: &'r CampaignRecord) -> &'r str {
        record.category(self.name()).unwrap_or(UNASSIGNED)
    }
}

impl From<&str> for Dimension {
    fn from(name: &str) -> Self {
        match name.trim() {
            "platform" => Dimension::Platform,
            "channel" => Dimension::Channel,
            other => Dimension::Custom(other.to_string()),
        }
    }
}

impl FromStr for Dimension {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Dimension::from(s))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct AttributionAnalyzer {
    engine: DecompositionEngine,
}

impl AttributionAnalyzer {
    pub fn new(engine: DecompositionEngine) -> Self {
        Self { engine }
    }

    /// One breakdown per distinct value of `dimension`.
    ///
    /// Small segments are kept and flagged low-confidence so that the
    /// segments' `contribution_to_total` values reconcile with the aggregate
    /// total change. Results are ordered by |contribution| descending.
    pub fn attribute_by(
        &self,
        metric: Metric,
        before: &PeriodWindow<'_>,
        after: &PeriodWindow<'_>,
        dimension: &Dimension,
    ) -> RcaResult<Vec<CausalBreakdownResult>> {
        let spec = metric.spec();
        ensure_usable(spec, before, after)?;

        let aggregate_before = before.aggregate(spec);
        let aggregate_after = after.aggregate(spec);
        let total_before = metric.value(&aggregate_before.totals);
        let total_after = metric.value(&aggregate_after.totals);

        let values: BTreeSet<&str> = before
            .usable_records(spec)
            .chain(after.usable_records(spec))
            .map(|r| dimension.value_of(r))
            .collect();

        let mut results = Vec::with_capacity(values.len());
        for value in values {
            let seg_before = before.filter(|r| dimension.value_of(r) == value);
            let seg_after = after.filter(|r| dimension.value_of(r) == value);
            let mut result = self.engine.decompose_segment(metric, &seg_before, &seg_after);

            let seg_totals_before = seg_before.aggregate(spec).totals;
            let seg_totals_after = seg_after.aggregate(spec).totals;
            let (share_before, share_after) = match metric.denominator() {
                Some(weight) => (
                    safe_div(seg_totals_before.field(weight), aggregate_before.totals.field(weight)),
                    safe_div(seg_totals_after.field(weight), aggregate_after.totals.field(weight)),
                ),
                None => (
                    safe_div(result.before_value, total_before),
                    safe_div(result.after_value, total_after),
                ),
            };
            let contribution_to_total = metric.contribution(&seg_totals_after, &aggregate_after.totals)
                - metric.contribution(&seg_totals_before, &aggregate_before.totals);

            if result.before_rows + result.after_rows < self.engine.scorer().min_samples() {
                result.low_confidence = true;
                result.confidence = result.confidence.min(self.engine.scorer().low_confidence_cap());
            }
            result.segment = Some(SegmentShare {
                dimension: dimension.name().to_string(),
                value: value.to_string(),
                share_before,
                share_after,
                contribution_to_total,
            });
            self.engine.resynthesize(&mut result);

            debug!(
                dimension = dimension.name(),
                value,
                contribution_to_total,
                low_confidence = result.low_confidence,
                "Attributed segment"
            );
            results.push(result);
        }

        results.sort_by(|a, b| {
            let key = |r: &CausalBreakdownResult| {
                r.segment
                    .as_ref()
                    .map(|s| s.contribution_to_total.abs())
                    .unwrap_or(0.0)
            };
            key(b)
                .total_cmp(&key(a))
                .then_with(|| segment_value(a).cmp(segment_value(b)))
        });

        info!(
            metric = spec.name,
            dimension = dimension.name(),
            segments = results.len(),
            total_change = total_after - total_before,
            "Attribution complete"
        );
        Ok(results)
    }
}

fn segment_value(result: &CausalBreakdownResult) -> &str {
    result
        .segment
        .as_ref()
        .map(|s| s.value.as_str())
        .unwrap_or_default()
}
