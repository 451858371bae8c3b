//! Error types for the edgequake-docextract library.
//!
//! A single fatal error type, [`ExtractError`], is returned from the
//! top-level `extract*` functions. Only conditions the pipeline cannot work
//! around reach the caller this way:
//!
//! * bad configuration (missing API key, unknown model),
//! * unusable input (unreadable file, invalid base64),
//! * a failed model call,
//! * model output that cannot be recovered into any structured value.
//!
//! Rasterisation problems are different: the rasteriser reports them as
//! `ExtractError` values, but the page source downgrades them to an empty
//! page sequence so a broken PDF still produces a (zero-image) request.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-docextract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input could not be interpreted as a document.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// The declared or detected media type is not one we can process.
    #[error("Unsupported media type '{media_type}'\nSupported: png, jpeg, jpg, webp, gif, pdf.")]
    UnsupportedMediaType { media_type: String },

    /// A string document was not valid base64 after removing any data-URI prefix.
    #[error("Document is not valid base64: {detail}")]
    InvalidBase64 { detail: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// No credential was supplied for the selected provider.
    #[error("API key for provider '{provider}' is not defined.\nPass --api-key or set {env_var}.")]
    MissingApiKey {
        provider: String,
        env_var: String,
    },

    /// The model identifier does not belong to any known provider family.
    #[error("Unsupported model '{model}'\nUse a gpt-4* model or one of: {known}.")]
    UnsupportedModel { model: String, known: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Rasterisation errors (downgraded to zero pages) ───────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// pdfium could not open or render the document.
    #[error("Rasterisation failed: {detail}")]
    RasterisationFailed { detail: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The provider returned a non-success response.
    #[error("Model call to '{provider}' failed: {detail}")]
    ModelCallFailed { provider: String, detail: String },

    /// The provider rejected the credential (401/403).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthError { provider: String, detail: String },

    /// The provider returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimitExceeded {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// The HTTP call exceeded the transport timeout.
    #[error("Model call to '{provider}' timed out after {secs}s")]
    ApiTimeout { provider: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The lenient parser could not recover structure from the model text.
    #[error("Model output is not recoverable as JSON: {detail}\nCleaned text: {cleaned}")]
    MalformedModelOutput { detail: String, cleaned: String },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// `true` for errors caused by configuration rather than input or I/O.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ExtractError::MissingApiKey { .. }
                | ExtractError::UnsupportedModel { .. }
                | ExtractError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_display() {
        let e = ExtractError::MissingApiKey {
            provider: "anthropic".into(),
            env_var: "ANTHROPIC_API_KEY".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("anthropic"), "got: {msg}");
        assert!(msg.contains("ANTHROPIC_API_KEY"), "got: {msg}");
        assert!(e.is_config_error());
    }

    #[test]
    fn unsupported_model_display() {
        let e = ExtractError::UnsupportedModel {
            model: "llama-3".into(),
            known: "claude-3-haiku-20240307".into(),
        };
        assert!(e.to_string().contains("llama-3"));
        assert!(e.is_config_error());
    }

    #[test]
    fn rate_limit_display() {
        let e = ExtractError::RateLimitExceeded {
            provider: "openai".into(),
            retry_after_secs: Some(30),
        };
        assert!(e.to_string().contains("openai"));
        assert!(!e.is_config_error());
    }

    #[test]
    fn malformed_output_carries_cleaned_text() {
        let e = ExtractError::MalformedModelOutput {
            detail: "unexpected end".into(),
            cleaned: "{total:".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("unexpected end"));
        assert!(msg.contains("{total:"));
    }
}
