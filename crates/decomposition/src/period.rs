//! Period splitting — partitions dated rows into a "before" and an "after"
//! window, either around a caller-supplied date or at the midpoint of the
//! lookback range.

use campaign_core::config::AnalysisConfig;
use campaign_core::error::{RcaError, RcaResult};
use campaign_core::metrics::{Metric, MetricSpec, Totals};
use campaign_core::types::{CampaignRecord, Period};
use chrono::{Duration, NaiveDate};
use tracing::debug;

/// A contiguous date window over borrowed campaign rows.
#[derive(Debug, Clone)]
pub struct PeriodWindow<'a> {
    pub period: Period,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub records: Vec<&'a CampaignRecord>,
}

/// Field sums over the rows of a window that carry every field a metric needs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowAggregate {
    pub totals: Totals,
    pub usable_rows: usize,
}

impl<'a> PeriodWindow<'a> {
    pub fn new(
        period: Period,
        start_date: NaiveDate,
        end_date: NaiveDate,
        records: Vec<&'a CampaignRecord>,
    ) -> Self {
        Self {
            period,
            start_date,
            end_date,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows that have every required field of `spec`.
    pub fn usable_records<'s>(
        &'s self,
        spec: &'s MetricSpec,
    ) -> impl Iterator<Item = &'a CampaignRecord> + 's {
        self.records.iter().copied().filter(move |r| {
            spec.required_fields
                .iter()
                .all(|f| r.field(*f).is_some())
        })
    }

    /// Sum the metric's fields over usable rows. Rows missing a required
    /// field are left out entirely instead of contributing zeros.
    pub fn aggregate(&self, spec: &MetricSpec) -> WindowAggregate {
        let mut aggregate = WindowAggregate::default();
        for record in self.usable_records(spec) {
            aggregate.totals.add(record);
            aggregate.usable_rows += 1;
        }
        aggregate
    }

    /// Per-row metric values, skipping rows whose own denominator is zero.
    pub fn row_values(&self, metric: Metric) -> Vec<f64> {
        self.records
            .iter()
            .filter_map(|r| metric.row_value(r))
            .collect()
    }

    /// The same window restricted to rows matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> PeriodWindow<'a>
    where
        F: Fn(&CampaignRecord) -> bool,
    {
        PeriodWindow {
            period: self.period,
            start_date: self.start_date,
            end_date: self.end_date,
            records: self
                .records
                .iter()
                .copied()
                .filter(|r| predicate(r))
                .collect(),
        }
    }
}

/// Splits rows into before/after windows.
#[derive(Debug, Clone)]
pub struct PeriodSplitter {
    lookback_days: u32,
    min_rows: usize,
}

impl PeriodSplitter {
    pub fn new(lookback_days: u32, min_rows: usize) -> Self {
        Self {
            lookback_days: lookback_days.max(1),
            min_rows: min_rows.max(1),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.lookback_days, config.min_rows)
    }

    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    /// Split `records` on `date_col`.
    ///
    /// With a split date `d`, before covers `[d - lookback, d - 1]` and after
    /// covers `[d, d + lookback - 1]`. Without one, the last `lookback_days`
    /// days of data are halved at their midpoint.
    pub fn split<'a>(
        &self,
        records: &'a [CampaignRecord],
        date_col: &str,
        split_date: Option<NaiveDate>,
    ) -> RcaResult<(PeriodWindow<'a>, PeriodWindow<'a>)> {
        let dated: Vec<(NaiveDate, &'a CampaignRecord)> = records
            .iter()
            .filter_map(|r| r.date_of(date_col).map(|d| (d, r)))
            .collect();

        let lookback = Duration::days(i64::from(self.lookback_days));
        let (before_start, split, after_end) = match split_date {
            Some(split) => (
                shifted(split, -lookback)?,
                split,
                shifted(split, lookback - Duration::days(1))?,
            ),
            None => {
                let (first, last) = dated
                    .iter()
                    .fold(None, |acc: Option<(NaiveDate, NaiveDate)>, (d, _)| match acc {
                        None => Some((*d, *d)),
                        Some((lo, hi)) => Some((lo.min(*d), hi.max(*d))),
                    })
                    .ok_or_else(|| {
                        RcaError::InsufficientData(format!(
                            "no rows have a value for date column '{}'",
                            date_col
                        ))
                    })?;
                // A lookback reaching past the calendar range covers all data.
                let start = last
                    .checked_sub_signed(lookback - Duration::days(1))
                    .map_or(first, |start| first.max(start));
                let span = (last - start).num_days();
                if span == 0 {
                    return Err(RcaError::InsufficientData(format!(
                        "all rows in range fall on {}; cannot form two periods",
                        last
                    )));
                }
                (start, start + Duration::days((span + 1) / 2), last)
            }
        };
        let before_end = split - Duration::days(1);

        let mut before = Vec::new();
        let mut after = Vec::new();
        for (date, record) in dated {
            if date >= before_start && date <= before_end {
                before.push(record);
            } else if date >= split && date <= after_end {
                after.push(record);
            }
        }

        let before = PeriodWindow::new(Period::Before, before_start, before_end, before);
        let after = PeriodWindow::new(Period::After, split, after_end, after);

        for window in [&before, &after] {
            if window.len() < self.min_rows {
                return Err(RcaError::InsufficientData(format!(
                    "{:?} window {}..={} has {} rows, at least {} required",
                    window.period,
                    window.start_date,
                    window.end_date,
                    window.len(),
                    self.min_rows
                )));
            }
        }

        debug!(
            before_start = %before.start_date,
            split = %after.start_date,
            after_end = %after.end_date,
            before_rows = before.len(),
            after_rows = after.len(),
            "Split records into periods"
        );
        Ok((before, after))
    }

    /// Split and additionally require a usable row for `spec` in each window.
    pub fn split_for<'a>(
        &self,
        spec: &MetricSpec,
        records: &'a [CampaignRecord],
        date_col: &str,
        split_date: Option<NaiveDate>,
    ) -> RcaResult<(PeriodWindow<'a>, PeriodWindow<'a>)> {
        let (before, after) = self.split(records, date_col, split_date)?;
        ensure_usable(spec, &before, &after)?;
        Ok((before, after))
    }
}

fn shifted(date: NaiveDate, by: Duration) -> RcaResult<NaiveDate> {
    date.checked_add_signed(by).ok_or_else(|| {
        RcaError::InsufficientData(format!(
            "window of {} days from {} falls outside the supported date range",
            by.num_days(),
            date
        ))
    })
}

/// Fail when either window has no row carrying every field `spec` needs.
pub fn ensure_usable(
    spec: &MetricSpec,
    before: &PeriodWindow<'_>,
    after: &PeriodWindow<'_>,
) -> RcaResult<()> {
    for window in [before, after] {
        if window.usable_records(spec).next().is_none() {
            let fields: Vec<&str> = spec.required_fields.iter().map(|f| f.name()).collect();
            return Err(RcaError::InsufficientData(format!(
                "{:?} window has no rows with all of [{}] for {}",
                window.period,
                fields.join(", "),
                spec.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn daily(days: std::ops::RangeInclusive<u32>) -> Vec<CampaignRecord> {
        days.map(|d| CampaignRecord::new(day(d)).with_totals(100.0, 1_000.0, 50.0, 5.0, 400.0))
            .collect()
    }

    #[test]
    fn test_auto_split_at_midpoint() {
        let records = daily(1..=30);
        let splitter = PeriodSplitter::new(30, 1);
        let (before, after) = splitter.split(&records, "date", None).unwrap();

        assert_eq!(before.len(), 15);
        assert_eq!(after.len(), 15);
        assert_eq!(before.start_date, day(1));
        assert_eq!(before.end_date, day(15));
        assert_eq!(after.start_date, day(16));
        assert_eq!(after.end_date, day(30));
        assert!(before.end_date < after.start_date);
    }

    #[test]
    fn test_auto_split_limited_to_lookback() {
        let records = daily(1..=30);
        let splitter = PeriodSplitter::new(10, 1);
        let (before, after) = splitter.split(&records, "date", None).unwrap();

        // Range is 21..=30, split at 26.
        assert_eq!(before.start_date, day(21));
        assert_eq!(after.start_date, day(26));
        assert_eq!(before.len(), 5);
        assert_eq!(after.len(), 5);
    }

    #[test]
    fn test_explicit_split_date() {
        let records = daily(1..=30);
        let splitter = PeriodSplitter::new(7, 1);
        let (before, after) = splitter.split(&records, "date", Some(day(15))).unwrap();

        assert_eq!(before.start_date, day(8));
        assert_eq!(before.end_date, day(14));
        assert_eq!(after.start_date, day(15));
        assert_eq!(after.end_date, day(21));
        assert_eq!(before.len(), 7);
        assert_eq!(after.len(), 7);
    }

    #[test]
    fn test_huge_lookback_covers_all_data() {
        let records = daily(1..=30);
        let splitter = PeriodSplitter::new(u32::MAX, 1);
        let (before, after) = splitter.split(&records, "date", None).unwrap();
        assert_eq!(before.start_date, day(1));
        assert_eq!(after.start_date, day(16));
        assert_eq!(before.len() + after.len(), 30);
    }

    #[test]
    fn test_huge_lookback_around_split_date_is_error() {
        let records = daily(1..=30);
        let splitter = PeriodSplitter::new(u32::MAX, 1);
        let err = splitter.split(&records, "date", Some(day(15))).unwrap_err();
        assert!(matches!(err, RcaError::InsufficientData(_)));
    }

    #[test]
    fn test_single_date_cannot_split() {
        let records = daily(4..=4);
        let splitter = PeriodSplitter::new(30, 1);
        let err = splitter.split(&records, "date", None).unwrap_err();
        assert!(matches!(err, RcaError::InsufficientData(_)));
    }

    #[test]
    fn test_empty_after_window_is_error() {
        let records = daily(1..=10);
        let splitter = PeriodSplitter::new(5, 1);
        let err = splitter.split(&records, "date", Some(day(25))).unwrap_err();
        assert!(matches!(err, RcaError::InsufficientData(_)));
    }

    #[test]
    fn test_unknown_date_column_is_error() {
        let records = daily(1..=10);
        let splitter = PeriodSplitter::new(30, 1);
        assert!(splitter.split(&records, "launch_date", None).is_err());
    }

    #[test]
    fn test_split_for_requires_metric_fields() {
        let mut records = daily(1..=10);
        for record in records.iter_mut().skip(5) {
            record.impressions = None;
        }
        let splitter = PeriodSplitter::new(30, 1);
        assert!(splitter
            .split_for(Metric::Cpa.spec(), &records, "date", None)
            .is_ok());
        let err = splitter
            .split_for(Metric::Ctr.spec(), &records, "date", None)
            .unwrap_err();
        assert!(matches!(err, RcaError::InsufficientData(_)));
    }

    #[test]
    fn test_aggregate_excludes_rows_with_missing_fields() {
        let mut records = daily(1..=4);
        records[1].clicks = None;
        let window = PeriodWindow::new(Period::Before, day(1), day(4), records.iter().collect());

        let ctr = window.aggregate(Metric::Ctr.spec());
        assert_eq!(ctr.usable_rows, 3);
        assert!((ctr.totals.impressions - 3_000.0).abs() < f64::EPSILON);
        assert!((ctr.totals.clicks - 150.0).abs() < f64::EPSILON);

        let spend = window.aggregate(Metric::Spend.spec());
        assert_eq!(spend.usable_rows, 4);
    }

    #[test]
    fn test_row_values_skip_zero_denominators() {
        let mut records = daily(1..=3);
        records[2].impressions = Some(0.0);
        let window = PeriodWindow::new(Period::After, day(1), day(3), records.iter().collect());
        let values = window.row_values(Metric::Ctr);
        assert_eq!(values.len(), 2);
        assert!((values[0] - 0.05).abs() < 1e-12);
    }
}
