//! Progress-callback trait for extraction stage events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractorConfigBuilder::progress_callback`] to observe the
//! pipeline as it moves through its states:
//!
//! ```text
//! ReceivingInput → Paginating → Cropping → Requesting → ParsingResult → Done
//!                                                            │
//!                                                            └─▶ Failed
//! ```
//!
//! A rasterisation error does not move the pipeline to `Failed`; it is
//! reported as zero pages through [`ExtractionProgressCallback::on_pages_ready`].
//!
//! # Example
//!
//! ```rust
//! use edgequake_docextract::{ExtractionProgressCallback, ExtractionStage, ExtractorConfig};
//! use std::sync::Arc;
//!
//! struct PrintStages;
//!
//! impl ExtractionProgressCallback for PrintStages {
//!     fn on_stage(&self, stage: ExtractionStage) {
//!         eprintln!("→ {stage}");
//!     }
//! }
//!
//! let config = ExtractorConfig::builder()
//!     .api_key("sk-test")
//!     .progress_callback(Arc::new(PrintStages))
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The states an extraction moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionStage {
    ReceivingInput,
    Paginating,
    Cropping,
    Requesting,
    ParsingResult,
    Done,
    Failed,
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionStage::ReceivingInput => "receiving input",
            ExtractionStage::Paginating => "paginating",
            ExtractionStage::Cropping => "cropping",
            ExtractionStage::Requesting => "requesting",
            ExtractionStage::ParsingResult => "parsing result",
            ExtractionStage::Done => "done",
            ExtractionStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Called by the extraction pipeline at each stage boundary.
///
/// Implementations must be `Send + Sync`; the extractor may be shared across
/// tasks. All methods have default no-op implementations.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called on entry to every stage, including `Done` and `Failed`.
    fn on_stage(&self, stage: ExtractionStage) {
        let _ = stage;
    }

    /// Called once pagination finished.
    ///
    /// # Arguments
    /// * `page_count`: pages that will be cropped and sent (may be 0)
    fn on_pages_ready(&self, page_count: usize) {
        let _ = page_count;
    }

    /// Called just before each model call.
    ///
    /// # Arguments
    /// * `pass`: 1-indexed call number
    /// * `total_passes`: 2 in two-pass mode, otherwise 1
    fn on_model_call(&self, pass: usize, total_passes: usize) {
        let _ = (pass, total_passes);
    }

    /// Called once when the run ends.
    fn on_complete(&self, success: bool) {
        let _ = success;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractorConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
