//! Whitespace trimming: crop each page to the bounding box of its content.
//!
//! Rendered PDF pages and phone scans carry wide white margins that cost image
//! tokens and shrink the text the model actually sees. We find the tightest
//! rectangle holding every non-white pixel and cut the page down to it.
//!
//! A pixel is background iff its red, green and blue samples are all 255.
//! Alpha is ignored, and near-white (anti-aliased or off-white scanner paper)
//! counts as content.
//!
//! The crop is a pure pixel copy: no scaling, no resampling.

use crate::pipeline::render::RasterPage;
use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The area of a page kept by [`crop_page`].
///
/// `bottom` and `right` are exclusive, so a non-empty region always satisfies
/// `top < bottom <= height` and `left < right <= width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropRegion {
    /// No non-background pixel was found.
    Empty,
    Bounds {
        top: u32,
        bottom: u32,
        left: u32,
        right: u32,
    },
}

impl CropRegion {
    pub fn is_empty(&self) -> bool {
        matches!(self, CropRegion::Empty)
    }

    /// Width and height of the region, or `None` when empty.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match *self {
            CropRegion::Empty => None,
            CropRegion::Bounds {
                top,
                bottom,
                left,
                right,
            } => Some((right - left, bottom - top)),
        }
    }
}

/// `true` when the pixel is pure white in all three colour channels.
#[inline]
pub fn is_background(px: &Rgba<u8>) -> bool {
    px[0] == u8::MAX && px[1] == u8::MAX && px[2] == u8::MAX
}

/// Locate the bounding box of all non-background pixels.
///
/// Four independent scans, each short-circuiting on its first hit: rows from
/// the top, rows from the bottom, columns from the left, columns from the
/// right.
pub fn find_region(img: &RgbaImage) -> CropRegion {
    let (width, height) = img.dimensions();

    let top = first_content_row(img, 0..height);
    let bottom = first_content_row(img, (0..height).rev());
    let left = first_content_column(img, 0..width);
    let right = first_content_column(img, (0..width).rev());

    match (top, bottom, left, right) {
        (Some(top), Some(bottom), Some(left), Some(right)) => CropRegion::Bounds {
            top,
            bottom: bottom + 1,
            left,
            right: right + 1,
        },
        _ => CropRegion::Empty,
    }
}

fn first_content_row(img: &RgbaImage, rows: impl Iterator<Item = u32>) -> Option<u32> {
    let width = img.width();
    for y in rows {
        for x in 0..width {
            if !is_background(img.get_pixel(x, y)) {
                return Some(y);
            }
        }
    }
    None
}

fn first_content_column(img: &RgbaImage, columns: impl Iterator<Item = u32>) -> Option<u32> {
    let height = img.height();
    for x in columns {
        for y in 0..height {
            if !is_background(img.get_pixel(x, y)) {
                return Some(x);
            }
        }
    }
    None
}

/// Crop a page to its content.
///
/// A blank page is returned unchanged together with [`CropRegion::Empty`];
/// this never fails.
pub fn crop_page(page: RasterPage) -> (CropRegion, RasterPage) {
    let region = find_region(&page.image);

    let CropRegion::Bounds {
        top,
        bottom,
        left,
        right,
    } = region
    else {
        warn!("Page {}: image is empty, sending it uncropped", page.index + 1);
        return (region, page);
    };

    let (width, height) = (right - left, bottom - top);
    if (width, height) == page.image.dimensions() {
        return (region, page);
    }

    let cropped = imageops::crop_imm(&page.image, left, top, width, height).to_image();
    debug!(
        "Page {}: cropped {}x{} → {}x{} at ({}, {})",
        page.index + 1,
        page.image.width(),
        page.image.height(),
        width,
        height,
        left,
        top
    );

    (
        region,
        RasterPage {
            index: page.index,
            image: cropped,
        },
    )
}
