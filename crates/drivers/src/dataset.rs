//! Feature matrix construction — resolves the target, validates and imputes
//! feature columns, and encodes categorical columns ordinally.

use campaign_core::error::{RcaError, RcaResult};
use campaign_core::metrics::Metric;
use campaign_core::types::{CampaignRecord, UNASSIGNED};
use ndarray::{Array1, Array2, ArrayView1};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const MIN_FEATURES: usize = 2;
pub const MIN_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

/// Why a requested column is not part of the matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    IsTarget,
    LowCoverage(f64),
    ZeroVariance,
}

/// Row-aligned feature matrix and target vector.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub names: Vec<String>,
    pub kinds: Vec<FeatureKind>,
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub dropped: Vec<(String, DropReason)>,
    /// Row labels of each categorical column, keyed by column index.
    pub labels: BTreeMap<usize, Vec<String>>,
}

impl FeatureMatrix {
    /// Build the matrix for `target` from `records`.
    ///
    /// `categorical_cols` are features too; a column named in both lists is
    /// treated as categorical.
    pub fn build(
        records: &[CampaignRecord],
        target: &str,
        feature_cols: &[&str],
        categorical_cols: &[&str],
        min_coverage: f64,
    ) -> RcaResult<Self> {
        let known_target = target.parse::<Metric>().is_ok()
            || records.iter().any(|r| r.number(target).is_some());
        if !known_target {
            return Err(RcaError::UnknownMetric(target.to_string()));
        }

        let rows: Vec<(&CampaignRecord, f64)> = records
            .iter()
            .filter_map(|r| r.number(target).filter(|v| v.is_finite()).map(|v| (r, v)))
            .collect();
        if rows.len() < MIN_ROWS {
            return Err(RcaError::InsufficientData(format!(
                "{} rows have a value for {}, at least {} required",
                rows.len(),
                target,
                MIN_ROWS
            )));
        }
        let y: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();

        let mut requested: Vec<(&str, FeatureKind)> = Vec::new();
        for col in feature_cols.iter().chain(categorical_cols) {
            if requested.iter().any(|(name, _)| name == col) {
                continue;
            }
            let kind = if categorical_cols.contains(col) {
                FeatureKind::Categorical
            } else {
                FeatureKind::Numeric
            };
            requested.push((*col, kind));
        }

        let mut names = Vec::new();
        let mut kinds = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();
        let mut dropped = Vec::new();
        let mut labels = BTreeMap::new();
        for (col, kind) in requested {
            if col.eq_ignore_ascii_case(target) {
                dropped.push((col.to_string(), DropReason::IsTarget));
                continue;
            }
            let encoded = match kind {
                FeatureKind::Numeric => numeric_column(&rows, col, min_coverage),
                FeatureKind::Categorical => {
                    categorical_labels(&rows, col, min_coverage).map(|row_labels| {
                        let codes = ordinal_codes(&row_labels, &y, 0..y.len());
                        labels.insert(names.len(), row_labels);
                        codes
                    })
                }
            };
            match encoded {
                Ok(column) => {
                    names.push(col.to_string());
                    kinds.push(kind);
                    columns.push(column);
                }
                Err(reason) => {
                    debug!(feature = col, reason = ?reason, "Dropped feature");
                    dropped.push((col.to_string(), reason));
                }
            }
        }

        if names.len() < MIN_FEATURES {
            return Err(RcaError::InsufficientFeatures {
                found: names.len(),
                required: MIN_FEATURES,
            });
        }

        let x = Array2::from_shape_fn((y.len(), columns.len()), |(i, j)| columns[j][i]);
        Ok(Self {
            names,
            kinds,
            x,
            y: Array1::from(y),
            dropped,
            labels,
        })
    }

    /// `x` with categorical codes ranked by the mean target of `fit_rows`
    /// only, so rows outside them do not shape the encoding.
    pub fn encoded_on(&self, fit_rows: &[usize]) -> Array2<f64> {
        let mut x = self.x.clone();
        let y = self.y.to_vec();
        for (&j, row_labels) in &self.labels {
            let codes = ordinal_codes(row_labels, &y, fit_rows.iter().copied());
            x.column_mut(j).assign(&Array1::from(codes));
        }
        x
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
        self.x.column(j)
    }
}

fn numeric_column(
    rows: &[(&CampaignRecord, f64)],
    col: &str,
    min_coverage: f64,
) -> Result<Vec<f64>, DropReason> {
    let raw: Vec<Option<f64>> = rows
        .iter()
        .map(|(r, _)| r.number(col).filter(|v| v.is_finite()))
        .collect();
    let present: Vec<f64> = raw.iter().flatten().copied().collect();
    let coverage = present.len() as f64 / rows.len() as f64;
    if present.is_empty() || coverage < min_coverage {
        return Err(DropReason::LowCoverage(coverage));
    }

    let mean = present.iter().sum::<f64>() / present.len() as f64;
    let column: Vec<f64> = raw.into_iter().map(|v| v.unwrap_or(mean)).collect();
    if is_constant(&column) {
        return Err(DropReason::ZeroVariance);
    }
    Ok(column)
}

/// Row labels of a categorical column, `(unassigned)` where missing.
fn categorical_labels(
    rows: &[(&CampaignRecord, f64)],
    col: &str,
    min_coverage: f64,
) -> Result<Vec<String>, DropReason> {
    let raw: Vec<Option<&str>> = rows.iter().map(|(r, _)| r.category(col)).collect();
    let coverage = raw.iter().filter(|v| v.is_some()).count() as f64 / rows.len() as f64;
    if coverage < min_coverage {
        return Err(DropReason::LowCoverage(coverage));
    }

    let labels: Vec<String> = raw
        .into_iter()
        .map(|v| v.unwrap_or(UNASSIGNED).to_string())
        .collect();
    if labels.iter().all(|l| *l == labels[0]) {
        return Err(DropReason::ZeroVariance);
    }
    Ok(labels)
}

/// Ordinal codes: categories ranked by their mean target over `fit_rows`,
/// ascending, ties by name. A category absent from `fit_rows` ranks at the
/// overall mean of those rows.
fn ordinal_codes(
    labels: &[String],
    target: &[f64],
    fit_rows: impl Iterator<Item = usize>,
) -> Vec<f64> {
    let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    let (mut total, mut count) = (0.0, 0usize);
    for i in fit_rows {
        let entry = groups.entry(labels[i].as_str()).or_insert((0.0, 0));
        entry.0 += target[i];
        entry.1 += 1;
        total += target[i];
        count += 1;
    }
    let fallback = if count > 0 { total / count as f64 } else { 0.0 };

    let categories: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
    let mut ranked: Vec<(&str, f64)> = categories
        .into_iter()
        .map(|name| {
            let mean = groups
                .get(name)
                .map_or(fallback, |(sum, n)| sum / *n as f64);
            (name, mean)
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let codes: BTreeMap<&str, f64> = ranked
        .iter()
        .enumerate()
        .map(|(rank, (name, _))| (*name, rank as f64))
        .collect();

    labels
        .iter()
        .map(|l| codes.get(l.as_str()).copied().unwrap_or_default())
        .collect()
}

fn is_constant(values: &[f64]) -> bool {
    match values.first() {
        Some(first) => values.iter().all(|v| (v - first).abs() <= 1e-12 * first.abs().max(1.0)),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(i: usize) -> CampaignRecord {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64);
        CampaignRecord::new(date)
            .with_totals(100.0 + i as f64, 1_000.0, 50.0, 5.0, 400.0 + 10.0 * i as f64)
            .with_value("sales", 2.0 * i as f64)
            .with_value("budget", i as f64)
    }

    #[test]
    fn test_builds_aligned_matrix() {
        let records: Vec<_> = (0..10).map(row).collect();
        let data = FeatureMatrix::build(&records, "sales", &["budget", "spend"], &[], 0.5).unwrap();
        assert_eq!(data.n_rows(), 10);
        assert_eq!(data.names, vec!["budget", "spend"]);
        assert!((data.x[[3, 0]] - 3.0).abs() < 1e-12);
        assert!((data.x[[3, 1]] - 103.0).abs() < 1e-12);
        assert!((data.y[3] - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_target() {
        let records: Vec<_> = (0..10).map(row).collect();
        let err = FeatureMatrix::build(&records, "profit", &["budget", "spend"], &[], 0.5).unwrap_err();
        assert!(matches!(err, RcaError::UnknownMetric(_)));
    }

    #[test]
    fn test_metric_target_resolves_per_row() {
        let records: Vec<_> = (0..10).map(row).collect();
        let data = FeatureMatrix::build(&records, "ROAS", &["budget", "clicks", "spend"], &[], 0.5).unwrap();
        // Clicks is constant.
        assert_eq!(data.names, vec!["budget", "spend"]);
        assert!((data.y[0] - 4.0).abs() < 1e-12);
        assert!(data
            .dropped
            .iter()
            .any(|(name, reason)| name == "clicks" && *reason == DropReason::ZeroVariance));
    }

    #[test]
    fn test_target_and_sparse_columns_are_dropped() {
        let mut records: Vec<_> = (0..10).map(row).collect();
        for (i, record) in records.iter_mut().enumerate() {
            if i < 3 {
                record.values.insert("promo".into(), i as f64);
            }
        }
        let err = FeatureMatrix::build(&records, "sales", &["sales", "promo", "budget"], &[], 0.5)
            .unwrap_err();
        assert!(matches!(err, RcaError::InsufficientFeatures { found: 1, required: 2 }));
    }

    #[test]
    fn test_missing_values_imputed_with_mean() {
        let mut records: Vec<_> = (0..4).map(row).collect();
        records[1].values.remove("budget");
        let data = FeatureMatrix::build(&records, "sales", &["budget", "spend"], &[], 0.5).unwrap();
        // Mean of 0, 2, 3.
        assert!((data.x[[1, 0]] - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_categories_ranked_by_mean_target() {
        let records: Vec<_> = (0..9)
            .map(|i| {
                let platform = ["tiktok", "google", "meta"][i % 3];
                row(i).with_platform(platform)
            })
            .map(|r| {
                let boost = match r.platform.as_deref() {
                    Some("google") => 100.0,
                    Some("meta") => 50.0,
                    _ => 0.0,
                };
                let sales = r.values["sales"] + boost;
                r.with_value("sales", sales)
            })
            .collect();
        let data = FeatureMatrix::build(&records, "sales", &["budget"], &["platform"], 0.5).unwrap();
        assert_eq!(data.kinds, vec![FeatureKind::Numeric, FeatureKind::Categorical]);
        assert!((data.x[[0, 1]] - 0.0).abs() < 1e-12); // tiktok
        assert!((data.x[[2, 1]] - 1.0).abs() < 1e-12); // meta
        assert!((data.x[[1, 1]] - 2.0).abs() < 1e-12); // google
    }

    #[test]
    fn test_encoding_on_fit_rows_ignores_other_targets() {
        // Rows 0..6 rank google above meta; rows 6..8 reverse that sharply.
        let records: Vec<_> = (0..8)
            .map(|i| {
                let platform = if i % 2 == 0 { "google" } else { "meta" };
                let sales = match (i < 6, platform) {
                    (true, "google") => 10.0,
                    (true, _) => 5.0,
                    (false, "google") => 0.0,
                    (false, _) => 100.0,
                };
                row(i).with_platform(platform).with_value("sales", sales)
            })
            .collect();
        let data = FeatureMatrix::build(&records, "sales", &["budget"], &["platform"], 0.5).unwrap();
        assert_eq!(data.labels.keys().copied().collect::<Vec<_>>(), vec![1]);
        // Over all rows meta has the higher mean.
        assert!((data.x[[1, 1]] - 1.0).abs() < 1e-12);

        let fit: Vec<usize> = (0..6).collect();
        let x = data.encoded_on(&fit);
        assert!((x[[0, 1]] - 1.0).abs() < 1e-12); // google
        assert!((x[[1, 1]] - 0.0).abs() < 1e-12); // meta
        assert!((x[[7, 1]] - 0.0).abs() < 1e-12);
        assert_eq!(x.column(0), data.x.column(0));
    }

    #[test]
    fn test_too_few_rows() {
        let records: Vec<_> = (0..2).map(row).collect();
        let err = FeatureMatrix::build(&records, "sales", &["budget", "spend"], &[], 0.5).unwrap_err();
        assert!(matches!(err, RcaError::InsufficientData(_)));
    }
}
