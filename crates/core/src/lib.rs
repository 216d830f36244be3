//! Shared data model for campaign root-cause analysis: campaign records,
//! the metric registry, result objects, errors and configuration.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::AppConfig;
pub use error::{RcaError, RcaResult};
pub use metrics::{Metric, MetricRegistry, MetricSpec};
