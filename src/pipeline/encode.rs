//! Image encoding: cropped [`RasterPage`] → base64 in the presented media type.
//!
//! Vision APIs take images as base64 inside the JSON request body, tagged with
//! a media type. The bytes we send must actually be in that type, so each page
//! is re-encoded in the type the provider is told: PNG for rasterised PDF
//! pages, the source format for images (with `jpg` spelled `jpeg`).

use crate::pipeline::input::MediaType;
use crate::pipeline::render::RasterPage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// JPEG quality used when a page is re-encoded as JPEG.
const JPEG_QUALITY: u8 = 90;

/// A page image ready to embed in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Canonical media type of `data` (never `Jpg` or `Pdf`).
    pub media_type: MediaType,
    /// Base64 payload without any data-URI prefix.
    pub data: String,
    /// Size of the encoded image before base64.
    pub byte_len: usize,
}

impl EncodedImage {
    /// `data:<mime>;base64,<data>`
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type.mime(), self.data)
    }
}

/// Encode a page as `media_type` (after [`MediaType::presented`] normalisation).
pub fn encode_page(page: &RasterPage, media_type: MediaType) -> Result<EncodedImage, image::ImageError> {
    let media_type = media_type.presented();
    let mut buf = Vec::new();

    match media_type {
        MediaType::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(page.image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(&rgb)?;
        }
        other => {
            let format = other.image_format().unwrap_or(ImageFormat::Png);
            page.image.write_to(&mut Cursor::new(&mut buf), format)?;
        }
    }

    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded page {} as {} → {} bytes base64",
        page.index + 1,
        media_type,
        data.len()
    );

    Ok(EncodedImage {
        media_type,
        data,
        byte_len: buf.len(),
    })
}
