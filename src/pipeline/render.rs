//! Page acquisition: turn a [`Document`] into an ordered list of raster pages.
//!
//! An image document yields exactly one page. A PDF is rasterised page by
//! page at [`PDF_RENDER_SCALE`] and then filtered by [`PageSelection`].
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and is not safe to drive
//! from async contexts. Rasterisation and image decoding are CPU-heavy, so
//! both run on tokio's blocking pool.
//!
//! ## Failure policy
//!
//! A PDF that cannot be rasterised, or an image that cannot be decoded,
//! produces **zero pages** and a `warn!`, never an error. The pipeline then
//! sends a request without images; a broken attachment must not abort the
//! call.

use crate::config::{PageSelection, PDF_RENDER_SCALE};
use crate::error::ExtractError;
use crate::pipeline::input::Document;
use image::{DynamicImage, RgbaImage};
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A fully decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterPage {
    /// 0-indexed position of the page in its source document.
    pub index: usize,
    pub image: RgbaImage,
}

/// Renders PDF bytes into page images.
///
/// Implementations are blocking and are always called from
/// `spawn_blocking`. They must return pages in document order and must
/// report malformed input as `Err`, not panic.
pub trait Rasterizer: Send + Sync {
    fn rasterize(
        &self,
        bytes: &[u8],
        scale: f32,
        font_resource_url: Option<&str>,
    ) -> Result<Vec<DynamicImage>, ExtractError>;
}

/// [`Rasterizer`] backed by pdfium.
///
/// Binds `PDFIUM_LIB_PATH` when set (a library file or the directory holding
/// it), otherwise the system library.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl PdfiumRasterizer {
    fn bind() -> Result<Pdfium, ExtractError> {
        let bindings = match std::env::var("PDFIUM_LIB_PATH") {
            Ok(p) if !p.is_empty() => {
                let path = Path::new(&p);
                let lib = if path.is_dir() {
                    Pdfium::pdfium_platform_library_name_at_path(path)
                } else {
                    path.to_path_buf()
                };
                Pdfium::bind_to_library(lib)
            }
            _ => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))?;

        Ok(Pdfium::new(bindings))
    }
}

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        bytes: &[u8],
        scale: f32,
        font_resource_url: Option<&str>,
    ) -> Result<Vec<DynamicImage>, ExtractError> {
        // pdfium ships its own standard-14 fonts.
        if let Some(url) = font_resource_url {
            debug!("pdfium uses built-in standard fonts; ignoring {}", url);
        }

        let pdfium = Self::bind()?;
        let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
            ExtractError::RasterisationFailed {
                detail: format!("{e:?}"),
            }
        })?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let pages = document.pages();
        info!("PDF loaded: {} pages", pages.len());

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ExtractError::RasterisationFailed {
                    detail: format!("page {}: {e:?}", idx + 1),
                }
            })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            images.push(image);
        }

        Ok(images)
    }
}

/// Produce the pages of `document` that should be sent to the model.
///
/// `selection` only applies to PDFs. Any failure degrades to an empty list.
pub async fn paginate(
    document: &Document,
    selection: PageSelection,
    rasterizer: Arc<dyn Rasterizer>,
    font_resource_url: Option<&str>,
) -> Vec<RasterPage> {
    let media_type = document.media_type();
    let bytes = document.bytes().to_vec();

    if !media_type.is_pdf() {
        let result = tokio::task::spawn_blocking(move || {
            let image = match media_type.image_format() {
                Some(format) => image::load_from_memory_with_format(&bytes, format),
                None => image::load_from_memory(&bytes),
            };
            image.map(|img| img.to_rgba8())
        })
        .await;

        return match result {
            Ok(Ok(image)) => vec![RasterPage { index: 0, image }],
            Ok(Err(e)) => {
                warn!("Failed to decode {} image: {}", media_type, e);
                Vec::new()
            }
            Err(e) => {
                warn!("Image decode task panicked: {}", e);
                Vec::new()
            }
        };
    }

    info!("Converting PDF to images");
    let font = font_resource_url.map(str::to_string);
    let result = tokio::task::spawn_blocking(move || {
        rasterizer.rasterize(&bytes, PDF_RENDER_SCALE, font.as_deref())
    })
    .await;

    let images = match result {
        Ok(Ok(images)) => images,
        Ok(Err(e)) => {
            warn!("PDF rasterisation failed, continuing with no pages: {}", e);
            return Vec::new();
        }
        Err(e) => {
            warn!("Rasterisation task panicked, continuing with no pages: {}", e);
            return Vec::new();
        }
    };

    select_pages(&images, selection)
}

/// Apply `selection` to a rendered document, converting pages to RGBA.
pub fn select_pages(images: &[DynamicImage], selection: PageSelection) -> Vec<RasterPage> {
    let indices = selection.to_indices(images.len());
    debug!(
        "PDF has {} pages; selected {:?} → {:?}",
        images.len(),
        selection,
        indices
    );
    indices
        .into_iter()
        .map(|index| RasterPage {
            index,
            image: images[index].to_rgba8(),
        })
        .collect()
}
