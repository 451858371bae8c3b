//! Configuration types for document extraction.
//!
//! All extraction behaviour is controlled through [`ExtractorConfig`], built
//! via its [`ExtractorConfigBuilder`]. The config is immutable once built and
//! is threaded explicitly into every pipeline stage; there is no global state.
//!
//! `build()` is where configuration errors surface: a missing credential or a
//! model identifier that belongs to no known provider family is rejected here,
//! before any document is touched.

use crate::error::ExtractError;
use crate::pipeline::provider::ProviderKind;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "gpt-4-turbo";

/// Default location of the pdf.js standard font data.
pub const DEFAULT_STANDARD_FONT_DATA_URL: &str =
    "https://unpkg.com/pdfjs-dist@3.2.146/standard_fonts/";

/// Upscaling factor applied when rasterising PDF pages.
///
/// Rendering at 2× keeps small print legible for the model at a moderate
/// image size. Fixed for every call.
pub const PDF_RENDER_SCALE: f32 = 2.0;

/// Model identifiers known to work with this crate.
pub const KNOWN_MODELS: &[&str] = &[
    "gpt-4-turbo",
    "gpt-4-vision-preview",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

/// Configuration for a [`crate::DocumentExtractor`].
///
/// # Example
/// ```rust
/// use edgequake_docextract::ExtractorConfig;
///
/// let config = ExtractorConfig::builder()
///     .api_key("sk-test")
///     .model("claude-3-haiku-20240307")
///     .multiple_passes(true)
///     .build()
///     .unwrap();
/// assert!(config.multiple_passes);
/// ```
#[derive(Clone)]
pub struct ExtractorConfig {
    /// Credential for the selected provider.
    pub api_key: String,

    /// Model identifier. Resolved to a provider family once, in `build()`.
    pub model: String,

    /// Provider family resolved from `model`.
    pub provider: ProviderKind,

    /// Font resource location forwarded to the rasteriser.
    pub standard_font_data_url: Option<String>,

    /// Trace every stage's intermediate state (page count, image dumps,
    /// prompt text, raw and cleaned model output).
    pub debug: bool,

    /// Default for calls that do not say whether to run two-pass extraction.
    pub multiple_passes: bool,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Transport timeout for a single model call, in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Override for the OpenAI API base URL.
    pub openai_base_url: Option<String>,

    /// Override for the Anthropic API base URL.
    pub anthropic_base_url: Option<String>,

    /// Optional observer for pipeline stage transitions.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("standard_font_data_url", &self.standard_font_data_url)
            .field("debug", &self.debug)
            .field("multiple_passes", &self.multiple_passes)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ExtractorConfig {
    /// Create a new builder for `ExtractorConfig`.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder::default()
    }
}

/// Builder for [`ExtractorConfig`].
pub struct ExtractorConfigBuilder {
    api_key: Option<String>,
    model: String,
    standard_font_data_url: Option<String>,
    debug: bool,
    multiple_passes: bool,
    max_tokens: usize,
    temperature: f32,
    api_timeout_secs: u64,
    download_timeout_secs: u64,
    openai_base_url: Option<String>,
    anthropic_base_url: Option<String>,
    progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractorConfigBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            standard_font_data_url: Some(DEFAULT_STANDARD_FONT_DATA_URL.to_string()),
            debug: false,
            multiple_passes: false,
            max_tokens: 4096,
            temperature: 0.0,
            api_timeout_secs: 120,
            download_timeout_secs: 120,
            openai_base_url: None,
            anthropic_base_url: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractorConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorConfigBuilder")
            .field("model", &self.model)
            .field("debug", &self.debug)
            .field("multiple_passes", &self.multiple_passes)
            .finish_non_exhaustive()
    }
}

impl ExtractorConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn standard_font_data_url(mut self, url: impl Into<String>) -> Self {
        self.standard_font_data_url = Some(url.into());
        self
    }

    pub fn debug(mut self, v: bool) -> Self {
        self.debug = v;
        self
    }

    pub fn multiple_passes(mut self, v: bool) -> Self {
        self.multiple_passes = v;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = secs;
        self
    }

    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = Some(url.into());
        self
    }

    pub fn anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_base_url = Some(url.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, resolving the provider and the credential.
    ///
    /// # Errors
    /// - [`ExtractError::UnsupportedModel`] when `model` matches no provider.
    /// - [`ExtractError::MissingApiKey`] when no key was given and the
    ///   provider's environment variable is unset or empty.
    /// - [`ExtractError::InvalidConfig`] for a zero `max_tokens`.
    pub fn build(self) -> Result<ExtractorConfig, ExtractError> {
        let provider =
            ProviderKind::for_model(&self.model).ok_or_else(|| ExtractError::UnsupportedModel {
                model: self.model.clone(),
                known: KNOWN_MODELS.join(", "),
            })?;

        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var(provider.api_key_env_var())
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
            .ok_or_else(|| ExtractError::MissingApiKey {
                provider: provider.to_string(),
                env_var: provider.api_key_env_var().to_string(),
            })?;

        if self.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }

        Ok(ExtractorConfig {
            api_key,
            model: self.model,
            provider,
            standard_font_data_url: self.standard_font_data_url,
            debug: self.debug,
            multiple_passes: self.multiple_passes,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            api_timeout_secs: self.api_timeout_secs,
            download_timeout_secs: self.download_timeout_secs,
            openai_base_url: self.openai_base_url,
            anthropic_base_url: self.anthropic_base_url,
            progress_callback: self.progress_callback,
        })
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which pages of a multi-page PDF are sent to the model.
///
/// Ignored for single images, which always yield exactly one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageSelection {
    /// Every page, in document order (default).
    #[default]
    All,
    /// Only the first page.
    First,
    /// Only the last page.
    Last,
    /// The first and the last page. A one-page document yields that page twice.
    FirstAndLast,
}

impl PageSelection {
    /// Expand the selection into 0-indexed page numbers, in emission order.
    ///
    /// Unlike a set, the result is not deduplicated: `FirstAndLast` on a
    /// single-page document returns `[0, 0]`.
    pub fn to_indices(self, total_pages: usize) -> Vec<usize> {
        if total_pages == 0 {
            return Vec::new();
        }
        let last = total_pages - 1;
        match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::First => vec![0],
            PageSelection::Last => vec![last],
            PageSelection::FirstAndLast => vec![0, last],
        }
    }
}

impl FromStr for PageSelection {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(PageSelection::All),
            "first" => Ok(PageSelection::First),
            "last" => Ok(PageSelection::Last),
            "first_and_last" => Ok(PageSelection::FirstAndLast),
            other => Err(ExtractError::InvalidConfig(format!(
                "unknown page selection '{other}' (expected all, first, last, first-and-last)"
            ))),
        }
    }
}
