//! Campaign RCA — explains why a campaign KPI moved between two periods and
//! ranks the row-level features that drive it.
//!
//! Reads normalized campaign records as JSON (an array, or one object per
//! line for `.jsonl` files) and prints the analysis result as JSON on stdout.

use anyhow::Context;
use campaign_core::config::AppConfig;
use campaign_core::types::CampaignRecord;
use campaign_core::MetricRegistry;
use campaign_decomposition::{CausalAnalyzer, Dimension};
use campaign_drivers::DriverAnalysisEngine;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-rca")]
#[command(about = "Root-cause analysis for campaign metric changes")]
#[command(version)]
struct Cli {
    /// TOML config file; environment variables take precedence
    #[arg(long, global = true, env = "CAMPAIGN_RCA_CONFIG")]
    config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decompose the change in a metric between two periods
    Breakdown {
        /// JSON or JSONL file of campaign records
        #[arg(long)]
        input: PathBuf,

        /// Metric name (ROAS, CPA, CTR, CVR, CPC, CPM, Revenue, Spend)
        #[arg(long)]
        metric: String,

        /// Date column to split on
        #[arg(long, default_value = "date")]
        date_col: String,

        /// First day of the "after" period (YYYY-MM-DD); defaults to the
        /// midpoint of the lookback range
        #[arg(long)]
        split_date: Option<NaiveDate>,

        /// Days per period (overrides config)
        #[arg(long, env = "CAMPAIGN_RCA__ANALYSIS__LOOKBACK_DAYS")]
        lookback_days: Option<u32>,

        /// Attribute the change per value of this dimension (platform,
        /// channel, or a custom dimension)
        #[arg(long)]
        by: Option<String>,
    },

    /// Rank features by their influence on a target metric
    Drivers {
        /// JSON or JSONL file of campaign records
        #[arg(long)]
        input: PathBuf,

        /// Target metric or numeric column
        #[arg(long)]
        target: String,

        /// Comma-separated numeric feature columns
        #[arg(long, value_delimiter = ',')]
        features: Vec<String>,

        /// Comma-separated categorical feature columns
        #[arg(long, value_delimiter = ',')]
        categorical: Vec<String>,

        /// Abort the analysis after this many seconds
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },

    /// List the supported metrics and their components
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "campaign_rca=info,campaign_decomposition=info,campaign_drivers=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let output = match cli.command {
        Commands::Breakdown {
            input,
            metric,
            date_col,
            split_date,
            lookback_days,
            by,
        } => {
            if let Some(days) = lookback_days {
                config.analysis.lookback_days = days;
            }
            let config = config.validated();
            let records = load_records(&input)?;
            info!(
                rows = records.len(),
                metric = %metric,
                lookback_days = config.analysis.lookback_days,
                "Running causal breakdown"
            );

            let analyzer = CausalAnalyzer::from_config(&config);
            match by {
                Some(dimension) => {
                    let dimension = Dimension::from(dimension.as_str());
                    let results =
                        analyzer.analyze_by(&records, &metric, &date_col, split_date, &dimension)?;
                    serde_json::to_value(results)?
                }
                None => {
                    let result = analyzer.analyze(&records, &metric, &date_col, split_date)?;
                    serde_json::to_value(result)?
                }
            }
        }

        Commands::Drivers {
            input,
            target,
            features,
            categorical,
            timeout_secs,
        } => {
            let records = load_records(&input)?;
            info!(
                rows = records.len(),
                target = %target,
                features = features.len() + categorical.len(),
                "Running driver analysis"
            );

            let engine = DriverAnalysisEngine::from_config(&config);
            let task = tokio::task::spawn_blocking(move || {
                let features: Vec<&str> = features.iter().map(String::as_str).collect();
                let categorical: Vec<&str> = categorical.iter().map(String::as_str).collect();
                engine.analyze_drivers(&records, &target, &features, &categorical)
            });
            let result = tokio::time::timeout(Duration::from_secs(timeout_secs), task)
                .await
                .map_err(|_| anyhow::anyhow!("driver analysis exceeded {timeout_secs}s"))?
                .context("driver analysis task failed")??;
            serde_json::to_value(result)?
        }

        Commands::Metrics => {
            let metrics: Vec<_> = MetricRegistry::all()
                .iter()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "formula": spec.formula,
                        "components": spec.components.iter().map(|c| c.name).collect::<Vec<_>>(),
                    })
                })
                .collect();
            serde_json::Value::Array(metrics)
        }
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{rendered}");
    Ok(())
}

/// An explicit config file must load; otherwise fall back to defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        })),
    }
}

fn load_records(path: &Path) -> anyhow::Result<Vec<CampaignRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let is_lines = path.extension().and_then(|e| e.to_str()) == Some("jsonl");
    if is_lines {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("{}:{}: invalid record", path.display(), n + 1))
            })
            .collect()
    } else {
        serde_json::from_str(&raw).with_context(|| format!("{}: invalid records", path.display()))
    }
}
