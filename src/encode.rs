//! Presentation encoding: [`RenderedPage`] → PNG bytes or a `data:` URI.
//!
//! Pages leave the pipeline as raw RGB so a GUI can blit them directly.
//! Everything that writes pages somewhere (files, an HTML gallery, JSON)
//! goes through here instead.
//!
//! ## Why PNG?
//! Reports are mostly text and charts. Lossless compression keeps glyph
//! edges sharp and flat colour areas compress well, so PNG is both smaller
//! and cleaner than JPEG for this content.

use crate::render::RenderedPage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";

/// Encode a page as PNG.
pub fn encode_png(page: &RenderedPage) -> Result<Vec<u8>, image::ImageError> {
    let img = to_rgb_image(page)?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!("Encoded page {} → {} bytes PNG", page.number(), buf.len());
    Ok(buf)
}

/// Encode a page as a `data:image/png;base64,...` URI for inline `<img>`.
pub fn encode_data_uri(page: &RenderedPage) -> Result<String, image::ImageError> {
    let png = encode_png(page)?;
    Ok(format!("data:{PNG_MIME};base64,{}", STANDARD.encode(png)))
}

/// Borrow-free view of the page as an `image` buffer.
pub fn to_rgb_image(page: &RenderedPage) -> Result<RgbImage, image::ImageError> {
    // RenderedPage guarantees the length, so this only fails if that
    // invariant is broken.
    RgbImage::from_raw(page.width(), page.height(), page.pixels().to_vec()).ok_or_else(|| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })
}

/// Conventional file name for a page: `page-0001.png`.
pub fn page_file_name(page: &RenderedPage) -> String {
    format!("page-{:04}.png", page.number())
}
