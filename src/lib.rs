//! # edgequake-docextract
//!
//! Extract structured JSON from document images and PDFs using vision
//! language models.
//!
//! ## Why this crate?
//!
//! Invoices, receipts, forms and statements rarely share a layout. Instead of
//! template matching, this crate shows each page to a vision model together
//! with a plain-language description of what to find ("invoice number, date
//! and total"), and recovers a JSON value from whatever the model answers.
//!
//! ## Pipeline Overview
//!
//! ```text
//! bytes / base64 / data URI
//!  │
//!  ├─ 1. Input     decode, resolve media type
//!  ├─ 2. Render    image → 1 page; PDF → pdfium at 2× + page selection
//!  ├─ 3. Crop      trim pure-white margins (per page, concurrent)
//!  ├─ 4. Encode    page → base64 in the provider's media type
//!  ├─ 5. Request   OpenAI or Anthropic shape, optional two-pass
//!  └─ 6. Parse     strip fences / newlines / commas → JSON5 → Value
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docextract::{DocumentExtractor, ExtractionInput, ExtractorConfig, MediaType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Key read from OPENAI_API_KEY when not set explicitly.
//!     let config = ExtractorConfig::builder().model("gpt-4-turbo").build()?;
//!     let extractor = DocumentExtractor::new(config)?;
//!
//!     let bytes = std::fs::read("invoice.pdf")?;
//!     let input = ExtractionInput::new(bytes, MediaType::Pdf, "invoice number and total");
//!     let value = extractor.extract(input).await?;
//!     println!("{}", serde_json::to_string_pretty(&value)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docextract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-docextract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Model
//!
//! | Model | Family | Two-pass |
//! |-------|--------|----------|
//! | `gpt-4-turbo` (default), any `gpt-4*` | OpenAI | no |
//! | `claude-3-opus-20240229`   | Anthropic | yes |
//! | `claude-3-sonnet-20240229` | Anthropic | yes |
//! | `claude-3-haiku-20240307`  | Anthropic | yes |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractorConfig, ExtractorConfigBuilder, PageSelection};
pub use error::ExtractError;
pub use extract::{DocumentExtractor, ExtractionInput};
pub use output::{ExtractionOutput, ExtractionStats};
pub use pipeline::crop::CropRegion;
pub use pipeline::input::{load_document, Document, DocumentData, MediaType};
pub use pipeline::llm::{HttpModelClient, ModelClient};
pub use pipeline::provider::{ModelProfile, ProviderKind, ProviderRequest};
pub use pipeline::render::{PdfiumRasterizer, RasterPage, Rasterizer};
pub use progress::{
    ExtractionProgressCallback, ExtractionStage, NoopProgressCallback, ProgressCallback,
};
