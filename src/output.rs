//! Result types returned by [`crate::DocumentExtractor::extract_detailed`].

use crate::pipeline::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The structured value plus what it took to produce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The recovered structured value. Its shape follows the prompt; no
    /// schema is enforced.
    pub data: Value,

    /// The model's text exactly as returned, before cleanup.
    pub raw_text: String,

    /// Output of the first pass when two-pass extraction ran.
    pub first_pass_text: Option<String>,

    pub stats: ExtractionStats,
}

/// Timing and volume statistics for one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub provider: ProviderKind,
    pub model: String,
    /// Page images sent to the model, after selection and after dropping pages
    /// that failed to encode. 0 when rasterisation failed.
    pub page_count: usize,
    /// Number of model calls made (1, or 2 in two-pass mode).
    pub model_calls: usize,
    pub total_duration_ms: u64,
    /// Time spent paginating and cropping.
    pub render_duration_ms: u64,
    /// Time spent waiting on the model.
    pub llm_duration_ms: u64,
}
