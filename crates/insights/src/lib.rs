//! Rule-based insight synthesis — turns breakdown and driver results into
//! short statements and ranked recommendations, with an optional
//! caller-supplied enhancement hook.

pub mod enhancer;
pub mod synthesizer;

pub use enhancer::{InsightEnhancer, NoEnhancement};
pub use synthesizer::{Explainable, InsightSynthesizer, Synthesis};
