//! Input resolution: turn caller-supplied data into a [`Document`].
//!
//! Library callers hand over raw bytes or a base64 string (optionally with a
//! `data:<mime>;base64,` prefix) together with a declared media type. The CLI
//! additionally accepts a local path or an HTTP/HTTPS URL; the media type is
//! then taken from the flag, the file extension, or the leading magic bytes,
//! in that order.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Media types accepted as document input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Png,
    Jpeg,
    /// Non-canonical spelling of JPEG, accepted on input.
    Jpg,
    Webp,
    Gif,
    Pdf,
}

impl MediaType {
    /// The MIME string for this type.
    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Jpg => "image/jpg",
            MediaType::Webp => "image/webp",
            MediaType::Gif => "image/gif",
            MediaType::Pdf => "application/pdf",
        }
    }

    pub fn is_pdf(self) -> bool {
        self == MediaType::Pdf
    }

    /// The type a page of this document is presented to a provider as.
    ///
    /// PDF pages are rasterised to PNG; `jpg` is canonicalised to `jpeg`.
    pub fn presented(self) -> MediaType {
        match self {
            MediaType::Pdf => MediaType::Png,
            MediaType::Jpg => MediaType::Jpeg,
            other => other,
        }
    }

    /// The `image` crate format used to decode or encode this type.
    pub fn image_format(self) -> Option<ImageFormat> {
        match self {
            MediaType::Png => Some(ImageFormat::Png),
            MediaType::Jpeg | MediaType::Jpg => Some(ImageFormat::Jpeg),
            MediaType::Webp => Some(ImageFormat::WebP),
            MediaType::Gif => Some(ImageFormat::Gif),
            MediaType::Pdf => None,
        }
    }

    /// Guess the media type from a file extension.
    pub fn from_path(path: &Path) -> Option<MediaType> {
        let ext = path.extension()?.to_str()?;
        ext.parse().ok()
    }

    /// Guess the media type from the leading bytes of a document.
    pub fn sniff(bytes: &[u8]) -> Option<MediaType> {
        if bytes.starts_with(b"%PDF") {
            return Some(MediaType::Pdf);
        }
        match image::guess_format(bytes).ok()? {
            ImageFormat::Png => Some(MediaType::Png),
            ImageFormat::Jpeg => Some(MediaType::Jpeg),
            ImageFormat::WebP => Some(MediaType::Webp),
            ImageFormat::Gif => Some(MediaType::Gif),
            _ => None,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

impl FromStr for MediaType {
    type Err = ExtractError;

    /// Accepts full MIME strings (`image/png`, `application/pdf`) and bare
    /// names (`png`, `pdf`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower
            .strip_prefix("image/")
            .or_else(|| lower.strip_prefix("application/"))
            .unwrap_or(&lower);
        match name {
            "png" => Ok(MediaType::Png),
            "jpeg" => Ok(MediaType::Jpeg),
            "jpg" => Ok(MediaType::Jpg),
            "webp" => Ok(MediaType::Webp),
            "gif" => Ok(MediaType::Gif),
            "pdf" => Ok(MediaType::Pdf),
            _ => Err(ExtractError::UnsupportedMediaType {
                media_type: s.to_string(),
            }),
        }
    }
}

/// Raw document payload as supplied by a caller.
#[derive(Debug, Clone)]
pub enum DocumentData {
    /// Already-decoded bytes.
    Bytes(Vec<u8>),
    /// Base64 text, optionally prefixed with `data:<mime>;base64,`.
    Base64(String),
}

impl From<Vec<u8>> for DocumentData {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentData::Bytes(bytes)
    }
}

impl From<&[u8]> for DocumentData {
    fn from(bytes: &[u8]) -> Self {
        DocumentData::Bytes(bytes.to_vec())
    }
}

impl From<String> for DocumentData {
    fn from(s: String) -> Self {
        DocumentData::Base64(s)
    }
}

impl From<&str> for DocumentData {
    fn from(s: &str) -> Self {
        DocumentData::Base64(s.to_string())
    }
}

/// An immutable input document: bytes plus their declared media type.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Vec<u8>,
    media_type: MediaType,
}

impl Document {
    pub fn new(bytes: Vec<u8>, media_type: MediaType) -> Self {
        Self { bytes, media_type }
    }

    /// Build a document from caller data, decoding base64 if needed.
    pub fn from_data(data: DocumentData, media_type: MediaType) -> Result<Self, ExtractError> {
        let bytes = match data {
            DocumentData::Bytes(b) => b,
            DocumentData::Base64(s) => decode_base64(&s)?,
        };
        Ok(Self::new(bytes, media_type))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn into_parts(self) -> (Vec<u8>, MediaType) {
        (self.bytes, self.media_type)
    }
}

/// Remove a `data:<mime>;base64,` prefix, if any.
///
/// Everything up to and including the first comma is dropped, provided the
/// comma is not the very first character.
pub fn strip_data_uri_prefix(s: &str) -> &str {
    match s.find(',') {
        Some(idx) if idx > 0 => &s[idx + 1..],
        _ => s,
    }
}

/// Decode a (possibly data-URI-prefixed) base64 string.
///
/// Whitespace inside the payload (line-wrapped base64) is ignored.
pub fn decode_base64(s: &str) -> Result<Vec<u8>, ExtractError> {
    let payload = strip_data_uri_prefix(s);
    if payload.len() != s.len() {
        debug!("Removed data-URI prefix from document string");
    }
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ExtractError::InvalidBase64 {
            detail: e.to_string(),
        })
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a document from a local path or an HTTP/HTTPS URL.
///
/// `media_type` overrides detection. Otherwise the extension is tried first,
/// then the response `Content-Type` (URLs only), then magic bytes.
pub async fn load_document(
    input: &str,
    media_type: Option<MediaType>,
    timeout_secs: u64,
) -> Result<Document, ExtractError> {
    let (bytes, hinted) = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        let path = PathBuf::from(input);
        let bytes = read_local(&path).await?;
        (bytes, MediaType::from_path(&path))
    };

    let media_type = media_type
        .or(hinted)
        .or_else(|| MediaType::sniff(&bytes))
        .ok_or_else(|| ExtractError::InvalidInput {
            input: input.to_string(),
            reason: "cannot determine media type; pass --media-type".into(),
        })?;

    debug!("Loaded {} bytes as {}", bytes.len(), media_type);
    Ok(Document::new(bytes, media_type))
}

async fn read_local(path: &Path) -> Result<Vec<u8>, ExtractError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExtractError::InvalidInput {
            input: path.display().to_string(),
            reason: e.to_string(),
        },
    })
}

/// Download a URL into memory, returning the bytes and any media-type hint.
async fn download_url(
    url: &str,
    timeout_secs: u64,
) -> Result<(Vec<u8>, Option<MediaType>), ExtractError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let hint = media_type_from_url(url).or_else(|| {
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .and_then(|v| v.parse().ok())
    });

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    Ok((bytes.to_vec(), hint))
}

/// Media type implied by the last path segment of a URL.
fn media_type_from_url(url: &str) -> Option<MediaType> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    MediaType::from_path(Path::new(last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/scan.png"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn media_type_parsing() {
        assert_eq!("image/png".parse::<MediaType>().unwrap(), MediaType::Png);
        assert_eq!("IMAGE/JPG".parse::<MediaType>().unwrap(), MediaType::Jpg);
        assert_eq!(
            "application/pdf".parse::<MediaType>().unwrap(),
            MediaType::Pdf
        );
        assert_eq!("webp".parse::<MediaType>().unwrap(), MediaType::Webp);
        assert!("image/tiff".parse::<MediaType>().is_err());
    }

    #[test]
    fn presented_type_normalisation() {
        assert_eq!(MediaType::Pdf.presented(), MediaType::Png);
        assert_eq!(MediaType::Jpg.presented(), MediaType::Jpeg);
        assert_eq!(MediaType::Gif.presented(), MediaType::Gif);
    }

    #[test]
    fn strip_prefix_only_when_comma_present() {
        assert_eq!(strip_data_uri_prefix("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_uri_prefix("AAAA"), "AAAA");
        assert_eq!(strip_data_uri_prefix(",AAAA"), ",AAAA");
    }

    #[test]
    fn decode_plain_and_prefixed_base64() {
        let raw = STANDARD.encode(b"hello");
        assert_eq!(decode_base64(&raw).unwrap(), b"hello");
        let prefixed = format!("data:image/png;base64,{raw}");
        assert_eq!(decode_base64(&prefixed).unwrap(), b"hello");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_base64("not base64 at all!!").unwrap_err();
        assert!(matches!(err, ExtractError::InvalidBase64 { .. }));
    }

    #[test]
    fn document_from_bytes_keeps_input() {
        let doc = Document::from_data(vec![1, 2, 3].into(), MediaType::Gif).unwrap();
        assert_eq!(doc.bytes(), &[1, 2, 3]);
        assert_eq!(doc.media_type(), MediaType::Gif);
    }

    #[test]
    fn sniff_pdf_and_png() {
        assert_eq!(MediaType::sniff(b"%PDF-1.7\n..."), Some(MediaType::Pdf));
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(MediaType::sniff(&png_magic), Some(MediaType::Png));
        assert_eq!(MediaType::sniff(b"plain text"), None);
    }

    #[test]
    fn media_type_from_extension() {
        assert_eq!(
            MediaType::from_path(Path::new("/tmp/receipt.JPG")),
            Some(MediaType::Jpg)
        );
        assert_eq!(MediaType::from_path(Path::new("invoice")), None);
    }

    #[tokio::test]
    async fn load_local_file_detects_type_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4 fake").unwrap();

        let doc = load_document(path.to_str().unwrap(), None, 5).await.unwrap();
        assert_eq!(doc.media_type(), MediaType::Pdf);
        assert_eq!(doc.bytes(), b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn load_missing_file_is_not_found() {
        let err = load_document("/definitely/not/here.png", None, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }), "{err}");
    }
}
