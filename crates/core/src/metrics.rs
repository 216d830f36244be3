//! Metric registry — the closed set of supported KPIs, their formulas, and
//! the ordered component factors each one decomposes into.

use crate::error::{RcaError, RcaResult};
use crate::types::{CampaignRecord, Field};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A supported campaign KPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "ROAS")]
    Roas,
    #[serde(rename = "CPA")]
    Cpa,
    #[serde(rename = "CTR")]
    Ctr,
    #[serde(rename = "CVR")]
    Cvr,
    #[serde(rename = "CPC")]
    Cpc,
    #[serde(rename = "CPM")]
    Cpm,
    Revenue,
    Spend,
}

/// A multiplicative factor a metric is built from, measured on aggregated totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Conversions,
    AverageOrderValue,
    Spend,
    Clicks,
    Impressions,
    CostPerClick,
    ConversionRate,
}

/// One named component of a metric: `factor ^ exponent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentSpec {
    pub name: &'static str,
    pub factor: Factor,
    pub exponent: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricShape {
    /// `scale × Π factor^exponent` over the declared components.
    Multiplicative { scale: f64 },
    /// A plain sum, decomposed into per-platform deltas.
    Additive,
}

/// Static definition of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub metric: Metric,
    pub name: &'static str,
    pub formula: &'static str,
    pub components: &'static [ComponentSpec],
    pub required_fields: &'static [Field],
    pub shape: MetricShape,
}

/// Field sums over a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub spend: f64,
    pub impressions: f64,
    pub clicks: f64,
    pub conversions: f64,
    pub revenue: f64,
}

const fn component(name: &'static str, factor: Factor, exponent: i32) -> ComponentSpec {
    ComponentSpec {
        name,
        factor,
        exponent,
    }
}

static SPECS: [MetricSpec; 8] = [
    MetricSpec {
        metric: Metric::Roas,
        name: "ROAS",
        formula: "revenue / spend = (conversions × aov) / spend",
        components: &[
            component("Conversion Volume", Factor::Conversions, 1),
            component("Average Order Value (AOV)", Factor::AverageOrderValue, 1),
            component("Spend Efficiency", Factor::Spend, -1),
        ],
        required_fields: &[Field::Spend, Field::Conversions, Field::Revenue],
        shape: MetricShape::Multiplicative { scale: 1.0 },
    },
    MetricSpec {
        metric: Metric::Cpa,
        name: "CPA",
        formula: "spend / conversions = cpc / cvr",
        components: &[
            component("CPC contribution", Factor::CostPerClick, 1),
            component("CVR contribution", Factor::ConversionRate, -1),
        ],
        required_fields: &[Field::Spend, Field::Clicks, Field::Conversions],
        shape: MetricShape::Multiplicative { scale: 1.0 },
    },
    MetricSpec {
        metric: Metric::Ctr,
        name: "CTR",
        formula: "clicks / impressions",
        components: &[
            component("Click Volume", Factor::Clicks, 1),
            component("Impression Volume", Factor::Impressions, -1),
        ],
        required_fields: &[Field::Clicks, Field::Impressions],
        shape: MetricShape::Multiplicative { scale: 1.0 },
    },
    MetricSpec {
        metric: Metric::Cvr,
        name: "CVR",
        formula: "conversions / clicks",
        components: &[
            component("Conversion Volume", Factor::Conversions, 1),
            component("Click Volume", Factor::Clicks, -1),
        ],
        required_fields: &[Field::Conversions, Field::Clicks],
        shape: MetricShape::Multiplicative { scale: 1.0 },
    },
    MetricSpec {
        metric: Metric::Cpc,
        name: "CPC",
        formula: "spend / clicks",
        components: &[
            component("Spend Change", Factor::Spend, 1),
            component("Click Volume", Factor::Clicks, -1),
        ],
        required_fields: &[Field::Spend, Field::Clicks],
        shape: MetricShape::Multiplicative { scale: 1.0 },
    },
    MetricSpec {
        metric: Metric::Cpm,
        name: "CPM",
        formula: "spend / impressions × 1000",
        components: &[
            component("Spend Change", Factor::Spend, 1),
            component("Impression Volume", Factor::Impressions, -1),
        ],
        required_fields: &[Field::Spend, Field::Impressions],
        shape: MetricShape::Multiplicative { scale: 1000.0 },
    },
    MetricSpec {
        metric: Metric::Revenue,
        name: "Revenue",
        formula: "conversions × aov",
        components: &[
            component("Conversion Volume", Factor::Conversions, 1),
            component("Average Order Value (AOV)", Factor::AverageOrderValue, 1),
        ],
        required_fields: &[Field::Revenue, Field::Conversions],
        shape: MetricShape::Multiplicative { scale: 1.0 },
    },
    MetricSpec {
        metric: Metric::Spend,
        name: "Spend",
        formula: "Σ platform spend",
        components: &[],
        required_fields: &[Field::Spend],
        shape: MetricShape::Additive,
    },
];

/// Resolves metric names to their static specs. Shared and read-only.
pub struct MetricRegistry;

impl MetricRegistry {
    pub fn get_spec(name: &str) -> RcaResult<&'static MetricSpec> {
        let metric: Metric = name.parse()?;
        Ok(metric.spec())
    }

    pub fn all() -> &'static [MetricSpec] {
        &SPECS
    }
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Roas,
        Metric::Cpa,
        Metric::Ctr,
        Metric::Cvr,
        Metric::Cpc,
        Metric::Cpm,
        Metric::Revenue,
        Metric::Spend,
    ];

    pub fn spec(self) -> &'static MetricSpec {
        let spec = match self {
            Metric::Roas => &SPECS[0],
            Metric::Cpa => &SPECS[1],
            Metric::Ctr => &SPECS[2],
            Metric::Cvr => &SPECS[3],
            Metric::Cpc => &SPECS[4],
            Metric::Cpm => &SPECS[5],
            Metric::Revenue => &SPECS[6],
            Metric::Spend => &SPECS[7],
        };
        debug_assert_eq!(spec.metric, self);
        spec
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Evaluate the metric on aggregated totals. Zero denominators yield 0.0.
    pub fn value(self, totals: &Totals) -> f64 {
        match self {
            Metric::Roas => safe_div(totals.revenue, totals.spend),
            Metric::Cpa => safe_div(totals.spend, totals.conversions),
            Metric::Ctr => safe_div(totals.clicks, totals.impressions),
            Metric::Cvr => safe_div(totals.conversions, totals.clicks),
            Metric::Cpc => safe_div(totals.spend, totals.clicks),
            Metric::Cpm => safe_div(totals.spend, totals.impressions) * 1000.0,
            Metric::Revenue => totals.revenue,
            Metric::Spend => totals.spend,
        }
    }

    /// Denominator field of a ratio metric, which also weights a segment's
    /// ratio inside the aggregate. `None` for additive metrics.
    pub fn denominator(self) -> Option<Field> {
        match self {
            Metric::Roas => Some(Field::Spend),
            Metric::Cpa => Some(Field::Conversions),
            Metric::Ctr | Metric::Cpm => Some(Field::Impressions),
            Metric::Cvr | Metric::Cpc => Some(Field::Clicks),
            Metric::Revenue | Metric::Spend => None,
        }
    }

    /// `part`'s numerator over `whole`'s denominator. Summed over rows that
    /// partition `whole` this gives `value(whole)`, including parts whose own
    /// denominator is zero. Additive metrics return `value(part)`.
    pub fn contribution(self, part: &Totals, whole: &Totals) -> f64 {
        match self.denominator() {
            Some(field) => {
                let mut totals = *part;
                totals.set(field, whole.field(field));
                self.value(&totals)
            }
            None => self.value(part),
        }
    }

    /// Metric value of a single row, `None` when a required field is
    /// missing or the row's own denominator is zero.
    pub fn row_value(self, record: &CampaignRecord) -> Option<f64> {
        let spec = self.spec();
        if spec
            .required_fields
            .iter()
            .any(|f| record.field(*f).is_none())
        {
            return None;
        }
        if let Some(field) = self.denominator() {
            if record.field(field).unwrap_or(0.0) <= 0.0 {
                return None;
            }
        }
        let totals = Totals::from_record(record);
        Some(self.value(&totals))
    }
}

impl FromStr for Metric {
    type Err = RcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Metric::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| RcaError::UnknownMetric(s.to_string()))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Factor {
    /// Factor value on aggregated totals; `None` when the factor itself is a
    /// ratio with a zero denominator.
    pub fn value(self, totals: &Totals) -> Option<f64> {
        match self {
            Factor::Conversions => Some(totals.conversions),
            Factor::Spend => Some(totals.spend),
            Factor::Clicks => Some(totals.clicks),
            Factor::Impressions => Some(totals.impressions),
            Factor::AverageOrderValue => checked_div(totals.revenue, totals.conversions),
            Factor::CostPerClick => checked_div(totals.spend, totals.clicks),
            Factor::ConversionRate => checked_div(totals.conversions, totals.clicks),
        }
    }
}

impl Totals {
    pub fn from_record(record: &CampaignRecord) -> Self {
        let mut totals = Totals::default();
        totals.add(record);
        totals
    }

    /// Add a row's fields; missing fields add nothing.
    pub fn add(&mut self, record: &CampaignRecord) {
        self.spend += record.spend.unwrap_or(0.0);
        self.impressions += record.impressions.unwrap_or(0.0);
        self.clicks += record.clicks.unwrap_or(0.0);
        self.conversions += record.conversions.unwrap_or(0.0);
        self.revenue += record.revenue.unwrap_or(0.0);
    }

    pub fn field(&self, field: Field) -> f64 {
        match field {
            Field::Spend => self.spend,
            Field::Impressions => self.impressions,
            Field::Clicks => self.clicks,
            Field::Conversions => self.conversions,
            Field::Revenue => self.revenue,
        }
    }

    pub fn set(&mut self, field: Field, value: f64) {
        let slot = match field {
            Field::Spend => &mut self.spend,
            Field::Impressions => &mut self.impressions,
            Field::Clicks => &mut self.clicks,
            Field::Conversions => &mut self.conversions,
            Field::Revenue => &mut self.revenue,
        };
        *slot = value;
    }
}

pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn checked_div(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0).then(|| numerator / denominator)
}
