//! Post-processing hook for enriching insight text (knowledge base, LLM...).
//!
//! Enhancers are injected by the caller and only ever append strings; the
//! rule-based output stays complete without them.

use campaign_core::types::{CausalBreakdownResult, DriverAnalysisResult};

pub trait InsightEnhancer: Send + Sync {
    fn enhance_breakdown(&self, _result: &CausalBreakdownResult) -> Vec<String> {
        Vec::new()
    }

    fn enhance_drivers(&self, _result: &DriverAnalysisResult) -> Vec<String> {
        Vec::new()
    }
}

/// Enhancer that adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEnhancement;

impl InsightEnhancer for NoEnhancement {}
