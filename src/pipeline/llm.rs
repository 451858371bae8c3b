//! Model transport: send a provider-native request, return the raw response.
//!
//! Request shaping is the adapter's job ([`crate::pipeline::provider`]); this
//! module only knows endpoints, auth headers and how HTTP failures map onto
//! [`ExtractError`]. There is no retry loop: a failed call surfaces to the
//! caller with the provider's own error text.
//!
//! The [`ModelClient`] trait is the seam tests use to stand in for the
//! network.

use crate::config::ExtractorConfig;
use crate::error::ExtractError;
use crate::pipeline::provider::{ProviderKind, ProviderRequest};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Sends one request to a model provider.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Perform the call and return the provider's JSON response verbatim.
    async fn call(&self, request: &ProviderRequest) -> Result<Value, ExtractError>;
}

/// [`ModelClient`] over HTTPS with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: Client,
    api_key: String,
    timeout_secs: u64,
    openai_base_url: String,
    anthropic_base_url: String,
}

impl HttpModelClient {
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ExtractError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            timeout_secs: config.api_timeout_secs,
            openai_base_url: config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            anthropic_base_url: config
                .anthropic_base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
        })
    }

    /// Full endpoint URL for `provider`.
    pub fn endpoint(&self, provider: ProviderKind) -> String {
        match provider {
            ProviderKind::OpenAi => {
                format!("{}/chat/completions", self.openai_base_url.trim_end_matches('/'))
            }
            ProviderKind::Anthropic => {
                format!("{}/messages", self.anthropic_base_url.trim_end_matches('/'))
            }
        }
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn call(&self, request: &ProviderRequest) -> Result<Value, ExtractError> {
        let provider = request.provider;
        let url = self.endpoint(provider);
        let start = Instant::now();

        let builder = self.client.post(&url).json(&request.body);
        let builder = match provider {
            ProviderKind::OpenAi => builder.bearer_auth(&self.api_key),
            ProviderKind::Anthropic => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
        };

        let response = builder.send().await.map_err(|e| self.transport_error(provider, e))?;
        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(provider, e))?;

        debug!(
            "{} {} → {} in {:?} ({} bytes)",
            provider,
            request.model,
            status,
            start.elapsed(),
            text.len()
        );

        if !status.is_success() {
            return Err(classify_status(provider, status, retry_after, &text));
        }

        serde_json::from_str(&text).map_err(|e| ExtractError::ModelCallFailed {
            provider: provider.to_string(),
            detail: format!("response is not JSON: {e}"),
        })
    }
}

impl HttpModelClient {
    fn transport_error(&self, provider: ProviderKind, e: reqwest::Error) -> ExtractError {
        if e.is_timeout() {
            ExtractError::ApiTimeout {
                provider: provider.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            ExtractError::ModelCallFailed {
                provider: provider.to_string(),
                detail: e.to_string(),
            }
        }
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Map a non-success HTTP status to an error.
pub fn classify_status(
    provider: ProviderKind,
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ExtractError {
    let provider_name = provider.to_string();
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body.trim(), MAX_ERROR_BODY));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExtractError::AuthError {
            provider: provider_name,
            detail,
        },
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("{} rate limit hit (retry after {:?}s)", provider, retry_after_secs);
            ExtractError::RateLimitExceeded {
                provider: provider_name,
                retry_after_secs,
            }
        }
        _ => ExtractError::ModelCallFailed {
            provider: provider_name,
            detail,
        },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
