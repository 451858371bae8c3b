//! Post-processing: recover a JSON value from free-form model output.
//!
//! Even when told to answer with bare JSON, models wrap it in ```` ```json ````
//! fences, break it across lines, leave trailing commas or quote nothing at
//! all. The rules below undo the common artefacts, then a lenient JSON5
//! parser accepts what strict JSON would reject (unquoted keys, single
//! quotes, trailing commas, comments).
//!
//! No schema is enforced: whatever shape the model produced is returned.
//!
//! ## Rule Order
//!
//! 1. Strip the first code-fence marker (with optional `json` tag), wherever
//!    it appears, and a trailing one.
//! 2. Remove every line break (`\r\n`, `\r`, `\n`).
//! 3. Strip one leading and one trailing comma.
//! 4. Empty text becomes `{}`.
//! 5. Parse leniently.
//!
//! Line breaks are deleted, not replaced by spaces, so a string literal that
//! the model wrapped mid-word is glued back together.

use crate::error::ExtractError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_OPENING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```(?:json5?)?").unwrap());

static RE_TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```\s*$").unwrap());

/// Apply the normalisation rules, returning the text handed to the parser.
pub fn clean_model_output(raw: &str) -> String {
    let s = strip_fences(raw);
    let s = remove_line_breaks(&s);
    let s = strip_edge_commas(s.trim());
    if s.is_empty() {
        "{}".to_string()
    } else {
        s.to_string()
    }
}

/// Clean `raw` and parse it into a JSON value.
///
/// # Errors
/// [`ExtractError::MalformedModelOutput`] when the cleaned text is not even
/// JSON5. The error carries the cleaned text for diagnosis.
pub fn parse_model_output(raw: &str) -> Result<Value, ExtractError> {
    let cleaned = clean_model_output(raw);
    json5::from_str::<Value>(&cleaned).map_err(|e| ExtractError::MalformedModelOutput {
        detail: e.to_string(),
        cleaned,
    })
}

// ── Rule 1: fences ──────────────────────────────────────────────────────────

fn strip_fences(input: &str) -> String {
    // `replace` touches only the first match.
    let s = RE_OPENING_FENCE.replace(input, "");
    RE_TRAILING_FENCE.replace(&s, "").into_owned()
}

// ── Rule 2: line breaks ─────────────────────────────────────────────────────

fn remove_line_breaks(input: &str) -> String {
    input.replace("\r\n", "").replace(['\r', '\n'], "")
}

// ── Rule 3: edge commas ─────────────────────────────────────────────────────

fn strip_edge_commas(input: &str) -> &str {
    let s = input.strip_prefix(',').unwrap_or(input);
    s.strip_suffix(',').unwrap_or(s)
}
