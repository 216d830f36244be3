//! Confidence scoring — Welch's two-sample t-test on per-row metric values,
//! blended with a sample-size factor.

use campaign_core::config::AnalysisConfig;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub score: f64,
    /// Two-sided p-value; `None` when the test could not be run.
    pub p_value: Option<f64>,
    pub samples: usize,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    min_samples: usize,
    significance_weight: f64,
    low_confidence_cap: f64,
}

impl ConfidenceScorer {
    pub fn new(min_samples: usize) -> Self {
        Self {
            min_samples: min_samples.max(1),
            significance_weight: 0.7,
            low_confidence_cap: 0.4,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            min_samples: config.min_samples.max(1),
            significance_weight: config.significance_weight,
            low_confidence_cap: config.low_confidence_cap,
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    pub fn low_confidence_cap(&self) -> f64 {
        self.low_confidence_cap
    }

    /// Score how trustworthy a difference between two windows is.
    pub fn score(&self, before: &[f64], after: &[f64]) -> ConfidenceScore {
        let samples = before.len() + after.len();
        let sample_factor = (samples as f64 / self.min_samples as f64).min(1.0);

        let test = welch_t_test(before, after);
        let (p, p_value) = match test {
            Some(test) => (test.p_value, Some(test.p_value)),
            // Without a usable variance the only signal is whether the means differ.
            None if means_differ(before, after) => (0.0, None),
            None => (1.0, None),
        };

        let significance = (1.0 - p).clamp(0.0, 1.0);
        let mut score = (self.significance_weight * significance
            + (1.0 - self.significance_weight) * sample_factor)
            .clamp(0.0, 1.0);

        let low_confidence = samples < self.min_samples || test.is_none();
        if low_confidence {
            score = score.min(self.low_confidence_cap);
        }

        ConfidenceScore {
            score,
            p_value,
            samples,
            low_confidence,
        }
    }
}

/// Welch's unequal-variance t-test. `None` when either sample has fewer than
/// two values or the combined standard error is zero.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchTest> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let (m1, v1) = mean_variance(a);
    let (m2, v2) = mean_variance(b);
    let (s1, s2) = (v1 / n1, v2 / n2);
    let se2 = s1 + s2;
    if se2 <= 0.0 || !se2.is_finite() {
        return None;
    }

    let t_statistic = (m2 - m1) / se2.sqrt();
    let degrees_of_freedom = se2 * se2 / (s1 * s1 / (n1 - 1.0) + s2 * s2 / (n2 - 1.0));
    if !degrees_of_freedom.is_finite() || degrees_of_freedom <= 0.0 {
        return None;
    }

    let dist = StudentsT::new(0.0, 1.0, degrees_of_freedom).ok()?;
    let p_value = (2.0 * (1.0 - dist.cdf(t_statistic.abs()))).clamp(0.0, 1.0);

    Some(WelchTest {
        t_statistic,
        degrees_of_freedom,
        p_value,
    })
}

/// Sample mean and unbiased variance.
fn mean_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

fn means_differ(a: &[f64], b: &[f64]) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    let (ma, mb) = (mean(a), mean(b));
    (ma - mb).abs() > 1e-12 * ma.abs().max(mb.abs()).max(1.0)
}
