//! Pipeline stages for document-to-JSON extraction.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested without the others and collaborators (rasteriser, model client) can
//! be swapped for stubs.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ crop ──▶ encode ──▶ provider ──▶ llm ──▶ postprocess
//! (bytes)   (pages)   (bbox)   (base64)   (payload)   (HTTP)   (lenient JSON)
//! ```
//!
//! 1. [`input`]    : decode base64 / data-URI input, resolve paths and URLs
//! 2. [`render`]   : one raster page per image, or selected PDF pages via
//!    pdfium in `spawn_blocking`
//! 3. [`crop`]     : trim the white margin around each page
//! 4. [`encode`]   : encode each cropped page in the type the provider is told
//! 5. [`provider`] : compose provider-native request bodies, project response text
//! 6. [`llm`]      : the only stage with network I/O
//! 7. [`postprocess`] : recover a JSON value from near-JSON model output

pub mod crop;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod provider;
pub mod render;
