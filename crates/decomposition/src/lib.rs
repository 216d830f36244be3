//! Causal breakdown of campaign KPI changes — period splitting, exact
//! component decomposition, significance-based confidence, and per-segment
//! attribution.

pub mod analyzer;
pub mod attribution;
pub mod confidence;
pub mod decomposition;
pub mod period;

pub use analyzer::CausalAnalyzer;
pub use attribution::{AttributionAnalyzer, Dimension};
pub use confidence::{ConfidenceScore, ConfidenceScorer};
pub use decomposition::DecompositionEngine;
pub use period::{PeriodSplitter, PeriodWindow};
