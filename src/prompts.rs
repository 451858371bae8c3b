//! Prompt text for vision-model extraction requests.
//!
//! Every string sent to a model lives here so provider adapters only deal
//! with wire shape. The caller's prompt names *what* to find; the suffixes
//! below pin down *how* the answer must look: a bare JSON object with every
//! number rendered as a string.

/// Instruction appended to every OpenAI-style request.
pub const JSON_RESPONSE_INSTRUCTION: &str =
    "Respond with a valid JSON object with all numbers as a string and no additional text or characters.";

/// Instruction appended to every Anthropic-style request.
///
/// Claude models tend to invent values for absent fields unless told to
/// return `null`.
pub const JSON_RESPONSE_INSTRUCTION_WITH_NULLS: &str =
    "Respond with a valid JSON object with all numbers as a string and no additional text or characters and if not provided, return null.";

/// Prompt for the open-ended first pass of two-pass extraction.
pub const FIRST_PASS_PROMPT: &str = "Extract all data including unlabeled fields";

/// System message for OpenAI-style requests.
pub fn openai_system_prompt(prompt: &str) -> String {
    format!("Find: {prompt}\n{JSON_RESPONSE_INSTRUCTION}")
}

/// Text block for Anthropic-style requests.
///
/// The first-pass output, when present, comes first so the model reads the
/// open-ended transcription before the constrained question. Without a first
/// pass the block still starts with an empty line.
pub fn anthropic_extraction_prompt(prompt: &str, prior_extraction: Option<&str>) -> String {
    format!(
        "{}\nFind: {prompt}\n{JSON_RESPONSE_INSTRUCTION_WITH_NULLS}",
        prior_extraction.unwrap_or_default()
    )
}
