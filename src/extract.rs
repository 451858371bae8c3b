//! Extraction entry points.
//!
//! [`DocumentExtractor`] composes the pipeline stages:
//!
//! ```text
//! ReceivingInput  decode base64 / data URI into a Document
//! Paginating      image → 1 page, PDF → rasterise + PageSelection
//! Cropping        per page, concurrently: trim whitespace, encode
//! Requesting      [first pass →] final request → model call
//! ParsingResult   tolerant JSON recovery
//! Done
//! ```
//!
//! Rasterisation problems never abort a run; they yield zero pages and the
//! model is asked anyway. Model call failures and unrecoverable output are
//! returned as errors, exactly once, without retry.

use crate::config::{ExtractorConfig, PageSelection};
use crate::error::ExtractError;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::crop::crop_page;
use crate::pipeline::encode::{encode_page, EncodedImage};
use crate::pipeline::input::{Document, DocumentData, MediaType};
use crate::pipeline::llm::{HttpModelClient, ModelClient};
use crate::pipeline::provider::{adapter_for, ExtractionRequest, ProviderAdapter};
use crate::pipeline::render::{self, PdfiumRasterizer, RasterPage, Rasterizer};
use crate::pipeline::postprocess;
use crate::progress::ExtractionStage;
use futures::future::join_all;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One extraction call: a document, what to find in it, and which pages.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub data: DocumentData,
    pub media_type: MediaType,
    pub prompt: String,
    pub pages: PageSelection,
    /// Overrides [`ExtractorConfig::multiple_passes`] for this call.
    pub multiple_passes: Option<bool>,
}

impl ExtractionInput {
    pub fn new(
        data: impl Into<DocumentData>,
        media_type: MediaType,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            media_type,
            prompt: prompt.into(),
            pages: PageSelection::All,
            multiple_passes: None,
        }
    }

    /// Build an input from an already-loaded [`Document`].
    pub fn from_document(document: Document, prompt: impl Into<String>) -> Self {
        let (bytes, media_type) = document.into_parts();
        Self::new(bytes, media_type, prompt)
    }

    pub fn pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }

    pub fn multiple_passes(mut self, v: bool) -> Self {
        self.multiple_passes = Some(v);
        self
    }
}

/// Runs extractions against one configured model.
///
/// Cheap to share behind an `Arc`; every call owns its own document, pages
/// and request.
pub struct DocumentExtractor {
    config: ExtractorConfig,
    adapter: Arc<dyn ProviderAdapter>,
    client: Arc<dyn ModelClient>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl DocumentExtractor {
    /// Create an extractor talking to the configured provider over HTTPS and
    /// rasterising PDFs with pdfium.
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractError> {
        let client = HttpModelClient::new(&config)?;
        Ok(Self {
            adapter: adapter_for(&config),
            client: Arc::new(client),
            rasterizer: Arc::new(PdfiumRasterizer),
            config,
        })
    }

    /// Replace the model transport.
    pub fn with_client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.client = client;
        self
    }

    /// Replace the PDF rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract a structured value from a document.
    pub async fn extract(&self, input: ExtractionInput) -> Result<Value, ExtractError> {
        self.extract_detailed(input).await.map(|out| out.data)
    }

    /// Like [`extract`](Self::extract), also returning raw model text and stats.
    ///
    /// # Errors
    /// - Input: [`ExtractError::InvalidBase64`].
    /// - Model: [`ExtractError::ModelCallFailed`], [`ExtractError::AuthError`],
    ///   [`ExtractError::RateLimitExceeded`], [`ExtractError::ApiTimeout`].
    /// - Output: [`ExtractError::MalformedModelOutput`].
    pub async fn extract_detailed(
        &self,
        input: ExtractionInput,
    ) -> Result<ExtractionOutput, ExtractError> {
        let result = self.run(input).await;

        if let Some(ref cb) = self.config.progress_callback {
            if result.is_err() {
                cb.on_stage(ExtractionStage::Failed);
            }
            cb.on_complete(result.is_ok());
        }
        result
    }

    /// Extract and write the value as pretty JSON to `output_path`.
    ///
    /// Uses atomic write (temp file + rename) so a failed run never leaves a
    /// partial file behind.
    pub async fn extract_to_file(
        &self,
        input: ExtractionInput,
        output_path: impl AsRef<Path>,
    ) -> Result<ExtractionStats, ExtractError> {
        let output = self.extract_detailed(input).await?;
        let path = output_path.as_ref();
        let write_err = |source| ExtractError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let json = serde_json::to_string_pretty(&output.data)
            .map_err(|e| ExtractError::Internal(format!("serialise output: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

        Ok(output.stats)
    }

    /// Synchronous wrapper around [`extract`](Self::extract).
    ///
    /// Creates a temporary tokio runtime internally; do not call from inside
    /// an async context.
    pub fn extract_sync(&self, input: ExtractionInput) -> Result<Value, ExtractError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.extract(input))
    }

    fn stage(&self, stage: ExtractionStage) {
        debug!("Stage: {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(stage);
        }
    }

    async fn run(&self, input: ExtractionInput) -> Result<ExtractionOutput, ExtractError> {
        let total_start = Instant::now();
        let trace = self.config.debug;

        // ── Receive ──────────────────────────────────────────────────────
        self.stage(ExtractionStage::ReceivingInput);
        let document = Document::from_data(input.data, input.media_type)?;
        if trace {
            info!(
                "Document: {} bytes of {}",
                document.bytes().len(),
                document.media_type()
            );
        }

        // ── Paginate ─────────────────────────────────────────────────────
        self.stage(ExtractionStage::Paginating);
        let render_start = Instant::now();
        let pages = render::paginate(
            &document,
            input.pages,
            Arc::clone(&self.rasterizer),
            self.config.standard_font_data_url.as_deref(),
        )
        .await;
        let rendered = pages.len();
        if trace {
            info!("Page count: {}", rendered);
        }
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pages_ready(rendered);
        }

        // ── Crop + encode ────────────────────────────────────────────────
        self.stage(ExtractionStage::Cropping);
        let target = self.adapter.profile().encoding_for(document.media_type());
        let images = crop_and_encode(pages, target).await?;
        let page_count = images.len();
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        if trace {
            for (i, img) in images.iter().enumerate() {
                info!("Image {} ({} bytes): {}", i + 1, img.byte_len, img.data_url());
            }
        }

        // ── Request ──────────────────────────────────────────────────────
        self.stage(ExtractionStage::Requesting);
        let request = ExtractionRequest {
            images,
            prompt: input.prompt,
        };
        if trace {
            info!("Prompt: {}", request.prompt);
        }

        let llm_start = Instant::now();
        let wants_two_pass = input
            .multiple_passes
            .unwrap_or(self.config.multiple_passes);
        let first_pass = if wants_two_pass {
            let composed = self.adapter.compose_first_pass(&request);
            if composed.is_none() {
                warn!(
                    "Two-pass extraction is not supported by {}; running a single pass",
                    self.adapter.kind()
                );
            }
            composed
        } else {
            None
        };
        let total_passes = if first_pass.is_some() { 2 } else { 1 };

        let first_pass_text = match first_pass {
            Some(req) => {
                self.model_call_started(1, total_passes);
                let response = self.client.call(&req).await?;
                let text = self.adapter.extract_text(&response);
                if trace {
                    info!("First pass output: {}", text);
                }
                Some(text)
            }
            None => None,
        };

        let final_request = self
            .adapter
            .compose_request(&request, first_pass_text.as_deref());
        self.model_call_started(total_passes, total_passes);
        let response = self.client.call(&final_request).await?;
        let raw_text = self.adapter.extract_text(&response);
        let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

        // ── Parse ────────────────────────────────────────────────────────
        self.stage(ExtractionStage::ParsingResult);
        if trace {
            info!("Raw model output: {}", raw_text);
            info!(
                "Cleaned model output: {}",
                postprocess::clean_model_output(&raw_text)
            );
        }
        let data = postprocess::parse_model_output(&raw_text)?;

        self.stage(ExtractionStage::Done);
        let stats = ExtractionStats {
            provider: self.adapter.kind(),
            model: self.config.model.clone(),
            page_count,
            model_calls: total_passes,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            render_duration_ms,
            llm_duration_ms,
        };
        info!(
            "Extraction complete: {} pages, {} model calls, {}ms total",
            stats.page_count, stats.model_calls, stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            data,
            raw_text,
            first_pass_text,
            stats,
        })
    }

    fn model_call_started(&self, pass: usize, total_passes: usize) {
        debug!("Model call {}/{}", pass, total_passes);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_model_call(pass, total_passes);
        }
    }
}

/// Crop and encode every page on the blocking pool, keeping page order.
///
/// A page that fails to encode is dropped with a warning.
async fn crop_and_encode(
    pages: Vec<RasterPage>,
    media_type: MediaType,
) -> Result<Vec<EncodedImage>, ExtractError> {
    let tasks = pages.into_iter().map(|page| {
        tokio::task::spawn_blocking(move || {
            let index = page.index;
            let (_, cropped) = crop_page(page);
            (index, encode_page(&cropped, media_type))
        })
    });

    let mut images = Vec::new();
    for joined in join_all(tasks).await {
        let (index, encoded) =
            joined.map_err(|e| ExtractError::Internal(format!("crop task failed: {e}")))?;
        match encoded {
            Ok(img) => images.push(img),
            Err(e) => warn!("Failed to encode page {}: {}", index + 1, e),
        }
    }
    Ok(images)
}
