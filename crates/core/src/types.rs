use crate::metrics::Metric;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Group label for rows that carry no value for a categorical dimension.
pub const UNASSIGNED: &str = "(unassigned)";

// ─── Campaign Records ───────────────────────────────────────────────────────

/// One row of observed campaign performance, already normalized by ingestion.
///
/// Base numeric fields are optional so that rows missing a field can be
/// excluded from an aggregate instead of being counted as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub date: NaiveDate,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub spend: Option<f64>,
    #[serde(default)]
    pub impressions: Option<f64>,
    #[serde(default)]
    pub clicks: Option<f64>,
    #[serde(default)]
    pub conversions: Option<f64>,
    #[serde(default)]
    pub revenue: Option<f64>,
    /// Additional categorical columns (campaign type, device, region...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dimensions: BTreeMap<String, String>,
    /// Additional numeric columns.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, f64>,
    /// Additional date columns, addressable as `date_col`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dates: BTreeMap<String, NaiveDate>,
}

/// Base numeric fields of a [`CampaignRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Spend,
    Impressions,
    Clicks,
    Conversions,
    Revenue,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Spend,
        Field::Impressions,
        Field::Clicks,
        Field::Conversions,
        Field::Revenue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Spend => "spend",
            Field::Impressions => "impressions",
            Field::Clicks => "clicks",
            Field::Conversions => "conversions",
            Field::Revenue => "revenue",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Field::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }
}

impl CampaignRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            platform: None,
            channel: None,
            spend: None,
            impressions: None,
            clicks: None,
            conversions: None,
            revenue: None,
            dimensions: BTreeMap::new(),
            values: BTreeMap::new(),
            dates: BTreeMap::new(),
        }
    }

    /// Set all five base fields at once.
    pub fn with_totals(
        mut self,
        spend: f64,
        impressions: f64,
        clicks: f64,
        conversions: f64,
        revenue: f64,
    ) -> Self {
        self.spend = Some(spend);
        self.impressions = Some(impressions);
        self.clicks = Some(clicks);
        self.conversions = Some(conversions);
        self.revenue = Some(revenue);
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.platform = Some(platform.to_string());
        self
    }

    pub fn with_channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn with_dimension(mut self, name: &str, value: &str) -> Self {
        self.dimensions.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn field(&self, field: Field) -> Option<f64> {
        match field {
            Field::Spend => self.spend,
            Field::Impressions => self.impressions,
            Field::Clicks => self.clicks,
            Field::Conversions => self.conversions,
            Field::Revenue => self.revenue,
        }
    }

    /// Resolve a numeric column: base fields, then per-row metrics
    /// (`ctr`, `roas`, ... and `aov`), then extra values.
    pub fn number(&self, col: &str) -> Option<f64> {
        if let Some(field) = Field::from_name(col) {
            return self.field(field);
        }
        if col.eq_ignore_ascii_case("aov") {
            let revenue = self.revenue?;
            let conversions = self.conversions?;
            return (conversions > 0.0).then(|| revenue / conversions);
        }
        if let Ok(metric) = col.parse::<Metric>() {
            return metric.row_value(self);
        }
        self.values.get(col).copied()
    }

    /// Resolve a categorical column: `platform`, `channel`, then extra dimensions.
    pub fn category(&self, col: &str) -> Option<&str> {
        match col {
            "platform" => self.platform.as_deref(),
            "channel" => self.channel.as_deref(),
            _ => self.dimensions.get(col).map(String::as_str),
        }
    }

    /// Resolve a date column: `date`, then extra date columns.
    pub fn date_of(&self, col: &str) -> Option<NaiveDate> {
        if col == "date" {
            Some(self.date)
        } else {
            self.dates.get(col).copied()
        }
    }
}

// ─── Breakdown Results ──────────────────────────────────────────────────────

/// Sign of a component's contribution to the metric change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
    Flat,
}

impl Direction {
    pub fn of(value: f64) -> Self {
        if value > 1e-12 {
            Direction::Increase
        } else if value < -1e-12 {
            Direction::Decrease
        } else {
            Direction::Flat
        }
    }
}

/// One named component of a metric change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentContribution {
    pub name: String,
    /// `None` when the component is undefined (zero factor in a period).
    pub absolute_value: Option<f64>,
    pub percent_of_total: Option<f64>,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Before,
    After,
    Both,
}

/// Non-fatal conditions surfaced inside a result rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    /// A component's factor was zero or undefined, so its contribution is null.
    DegenerateDivision { component: String, period: Period },
}

/// Where a segment sits inside the aggregate, for reconciling segments
/// against the overall breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentShare {
    pub dimension: String,
    pub value: String,
    pub share_before: f64,
    pub share_after: f64,
    /// Mix-adjusted share of the aggregate total change; sums across segments
    /// to the aggregate `total_change`.
    pub contribution_to_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalBreakdownResult {
    pub metric: String,
    pub before_value: f64,
    pub after_value: f64,
    pub total_change: f64,
    /// `None` when the before value is zero.
    pub total_change_pct: Option<f64>,
    pub primary_driver: Option<String>,
    pub components: Vec<ComponentContribution>,
    pub confidence: f64,
    pub low_confidence: bool,
    pub before_rows: usize,
    pub after_rows: usize,
    pub warnings: Vec<AnalysisWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<SegmentShare>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl CausalBreakdownResult {
    pub fn component(&self, name: &str) -> Option<&ComponentContribution> {
        self.components.iter().find(|c| c.name == name)
    }

    /// Sum of all defined component contributions.
    pub fn explained_change(&self) -> f64 {
        self.components.iter().filter_map(|c| c.absolute_value).sum()
    }

    pub fn has_degenerate_components(&self) -> bool {
        self.components.iter().any(|c| c.absolute_value.is_none())
    }
}

// ─── Driver Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMethod {
    Ml,
    Correlation,
}

impl DriverMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverMethod::Ml => "ml",
            DriverMethod::Correlation => "correlation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDirection {
    Positive,
    Negative,
    Neutral,
}

impl FeatureDirection {
    pub fn of(value: f64) -> Self {
        if value > 1e-9 {
            FeatureDirection::Positive
        } else if value < -1e-9 {
            FeatureDirection::Negative
        } else {
            FeatureDirection::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub name: String,
    pub importance: f64,
    /// Importance normalized to sum to 1 across reported features.
    pub importance_share: f64,
    pub direction: FeatureDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverAnalysisResult {
    pub target_metric: String,
    /// Holdout R² of the model; `None` on the correlation path.
    pub model_quality: Option<f64>,
    pub features: Vec<FeatureImportance>,
    pub method: DriverMethod,
    pub rows_used: usize,
    pub fallback_reason: Option<String>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

impl DriverAnalysisResult {
    pub fn top_feature(&self) -> Option<&FeatureImportance> {
        self.features.first()
    }
}
