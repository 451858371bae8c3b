//! Provider adapters: request composition and response projection.
//!
//! Each model family has its own wire shape. An adapter knows how to lay out
//! cropped page images and prompt text for one family, and where that family
//! puts the generated text in its response. Transport is not handled here;
//! see [`crate::pipeline::llm`].
//!
//! The adapter is chosen once, when the config is built, from the model
//! identifier:
//!
//! | Identifier                         | Family    |
//! |------------------------------------|-----------|
//! | starts with `gpt-4`                | OpenAI    |
//! | one of [`ANTHROPIC_MODELS`]        | Anthropic |
//!
//! Only the Anthropic adapter supports two-pass extraction.

use crate::config::ExtractorConfig;
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::input::MediaType;
use crate::prompts::{anthropic_extraction_prompt, openai_system_prompt, FIRST_PASS_PROMPT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Model identifiers served by the Anthropic adapter.
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

/// Identifier prefix served by the OpenAI adapter.
pub const OPENAI_MODEL_PREFIX: &str = "gpt-4";

/// Model used for the open-ended first pass of two-pass extraction.
pub const FIRST_PASS_MODEL: &str = "claude-3-haiku-20240307";

/// OpenAI model that rejects `response_format: json_object`.
const TEXT_ONLY_OPENAI_MODEL: &str = "gpt-4-vision-preview";

const VISION_MEDIA_TYPES: &[MediaType] = &[
    MediaType::Png,
    MediaType::Jpeg,
    MediaType::Webp,
    MediaType::Gif,
];

/// The supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// Resolve a model identifier to its family, or `None` if unknown.
    pub fn for_model(model: &str) -> Option<ProviderKind> {
        if model.starts_with(OPENAI_MODEL_PREFIX) {
            Some(ProviderKind::OpenAi)
        } else if ANTHROPIC_MODELS.contains(&model) {
            Some(ProviderKind::Anthropic)
        } else {
            None
        }
    }

    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env_var(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn profile(self) -> &'static ModelProfile {
        match self {
            ProviderKind::OpenAi => &OPENAI_PROFILE,
            ProviderKind::Anthropic => &ANTHROPIC_PROFILE,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => f.write_str("openai"),
            ProviderKind::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// Static capabilities of a model family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProfile {
    pub provider: ProviderKind,
    pub supported_media_types: &'static [MediaType],
    /// Maximum images per request, if the API enforces one.
    pub max_images: Option<usize>,
    /// Maximum encoded size of one image, if the API enforces one.
    pub max_image_bytes: Option<usize>,
    pub supports_two_pass: bool,
}

impl ModelProfile {
    pub fn supports(&self, media_type: MediaType) -> bool {
        self.supported_media_types.contains(&media_type)
    }

    /// The media type pages of `source` should be encoded as.
    ///
    /// PDF → PNG and jpg → jpeg; anything the provider cannot take falls
    /// back to PNG.
    pub fn encoding_for(&self, source: MediaType) -> MediaType {
        let presented = source.presented();
        if self.supports(presented) {
            presented
        } else {
            MediaType::Png
        }
    }
}

pub static OPENAI_PROFILE: ModelProfile = ModelProfile {
    provider: ProviderKind::OpenAi,
    supported_media_types: VISION_MEDIA_TYPES,
    max_images: None,
    max_image_bytes: Some(20 * 1024 * 1024),
    supports_two_pass: false,
};

pub static ANTHROPIC_PROFILE: ModelProfile = ModelProfile {
    provider: ProviderKind::Anthropic,
    supported_media_types: VISION_MEDIA_TYPES,
    max_images: Some(20),
    max_image_bytes: Some(5 * 1024 * 1024),
    supports_two_pass: true,
};

/// Provider-agnostic input to request composition, built once per run.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    /// Cropped, encoded pages in page order. May be empty.
    pub images: Vec<EncodedImage>,
    /// The caller's extraction target.
    pub prompt: String,
}

/// A provider-native request body plus where to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub provider: ProviderKind,
    pub model: String,
    pub body: Value,
}

/// Per-family request composition and response projection.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn profile(&self) -> &'static ModelProfile {
        self.kind().profile()
    }

    /// Build the final extraction request.
    ///
    /// `prior_extraction` is the first-pass output in two-pass mode; it is
    /// placed before the instruction text.
    fn compose_request(
        &self,
        request: &ExtractionRequest,
        prior_extraction: Option<&str>,
    ) -> ProviderRequest;

    /// Build the open-ended first-pass request, or `None` when this family
    /// does not support two-pass extraction.
    fn compose_first_pass(&self, _request: &ExtractionRequest) -> Option<ProviderRequest> {
        None
    }

    /// Pull the generated text out of a response body. Missing text yields
    /// an empty string; no cleanup is done here.
    fn extract_text(&self, response: &Value) -> String;
}

/// Serialise a typed request body.
fn request_body<T: Serialize>(body: &T) -> Value {
    // Request structs hold only string keys and plain values.
    serde_json::to_value(body).expect("request body serialises")
}

/// Create the adapter for the provider resolved in `config`.
pub fn adapter_for(config: &ExtractorConfig) -> Arc<dyn ProviderAdapter> {
    match config.provider {
        ProviderKind::OpenAi => Arc::new(OpenAiAdapter::new(
            &config.model,
            config.max_tokens,
            config.temperature,
        )),
        ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(
            &config.model,
            config.max_tokens,
            config.temperature,
        )),
    }
}

fn warn_on_limits(profile: &ModelProfile, images: &[EncodedImage]) {
    if let Some(max) = profile.max_images {
        if images.len() > max {
            warn!(
                "{} accepts at most {} images per request; sending {}",
                profile.provider,
                max,
                images.len()
            );
        }
    }
    if let Some(max) = profile.max_image_bytes {
        for (i, img) in images.iter().enumerate() {
            if img.byte_len > max {
                warn!(
                    "Image {} is {} bytes, above the {} limit of {} bytes",
                    i + 1,
                    img.byte_len,
                    profile.provider,
                    max
                );
            }
        }
    }
}

// ── OpenAI ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat-completions adapter: instructions in a system message, images as
/// `image_url` parts of a single user message.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl OpenAiAdapter {
    pub fn new(model: impl Into<String>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            temperature,
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn compose_request(
        &self,
        request: &ExtractionRequest,
        prior_extraction: Option<&str>,
    ) -> ProviderRequest {
        warn_on_limits(self.profile(), &request.images);

        let mut system = openai_system_prompt(&request.prompt);
        if let Some(prior) = prior_extraction {
            system = format!("{prior}\n{system}");
        }

        let parts = request
            .images
            .iter()
            .map(|img| ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: img.data_url(),
                },
            })
            .collect();

        let format_type = if self.model == TEXT_ONLY_OPENAI_MODEL {
            "text"
        } else {
            "json_object"
        };

        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: ChatContent::Text(system),
                },
                ChatMessage {
                    role: "user",
                    content: ChatContent::Parts(parts),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat { format_type },
        };

        ProviderRequest {
            provider: ProviderKind::OpenAi,
            model: self.model.clone(),
            body: request_body(&body),
        }
    }

    fn extract_text(&self, response: &Value) -> String {
        ChatResponse::deserialize(response)
            .ok()
            .and_then(|r| r.choices.into_iter().next())
            .and_then(|c| c.message.content)
            .unwrap_or_default()
    }
}

// ── Anthropic ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    temperature: f32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Messages-API adapter: one user turn holding image blocks and a text block.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl AnthropicAdapter {
    pub fn new(model: impl Into<String>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    fn image_blocks(images: &[EncodedImage]) -> Vec<ContentBlock> {
        images
            .iter()
            .map(|img| ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: img.media_type.mime(),
                    data: img.data.clone(),
                },
            })
            .collect()
    }

    fn request(&self, model: &str, content: Vec<ContentBlock>) -> ProviderRequest {
        let body = MessagesRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content,
            }],
        };
        ProviderRequest {
            provider: ProviderKind::Anthropic,
            model: model.to_string(),
            body: request_body(&body),
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn compose_request(
        &self,
        request: &ExtractionRequest,
        prior_extraction: Option<&str>,
    ) -> ProviderRequest {
        warn_on_limits(self.profile(), &request.images);

        let mut content = Self::image_blocks(&request.images);
        content.push(ContentBlock::Text {
            text: anthropic_extraction_prompt(&request.prompt, prior_extraction),
        });
        self.request(&self.model, content)
    }

    fn compose_first_pass(&self, request: &ExtractionRequest) -> Option<ProviderRequest> {
        let mut content = vec![ContentBlock::Text {
            text: FIRST_PASS_PROMPT.to_string(),
        }];
        content.extend(Self::image_blocks(&request.images));
        Some(self.request(FIRST_PASS_MODEL, content))
    }

    fn extract_text(&self, response: &Value) -> String {
        MessagesResponse::deserialize(response)
            .ok()
            .and_then(|r| r.content.into_iter().next())
            .and_then(|b| b.text)
            .unwrap_or_default()
    }
}
