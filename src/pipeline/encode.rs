//! Image encoding: embedded slide images → base64 PNG.
//!
//! Images pulled out of a deck arrive in whatever form the container holds
//! them (decoded pdfium bitmaps, PPTX media parts in PNG/JPEG/EMF). The vision
//! pass needs them as base64 data-URIs in the request body, so everything that
//! `image` can decode is normalised to PNG here.
//!
//! `detail: "high"` is set on every attachment: diagrams carry axis labels and
//! small annotations that the single low-detail tile loses.

use crate::slide::SlideImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Longest edge sent to the vision model. Larger images are downscaled.
const MAX_EDGE: u32 = 1536;

/// Encode a decoded image as base64 PNG.
pub fn encode_png(img: &DynamicImage) -> Result<String, image::ImageError> {
    let img = if img.width().max(img.height()) > MAX_EDGE {
        img.resize(MAX_EDGE, MAX_EDGE, image::imageops::FilterType::Triangle)
    } else {
        img.clone()
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

/// Decode raw container bytes (PNG, JPEG, ...) and re-encode as base64 PNG.
///
/// Returns `None` for formats `image` cannot read (EMF, WMF, SVG); those
/// slides still count as having an image but are skipped by the vision pass.
pub fn encode_bytes(bytes: &[u8]) -> Option<String> {
    match image::load_from_memory(bytes) {
        Ok(img) => encode_png(&img).ok(),
        Err(e) => {
            debug!("Skipping undecodable image ({} bytes): {}", bytes.len(), e);
            None
        }
    }
}

/// Vision attachment for a slide image, if its pixels were captured.
pub fn to_image_data(image: &SlideImage) -> Option<ImageData> {
    image
        .data
        .as_ref()
        .map(|b64| ImageData::new(b64.clone(), image.mime_type.clone()).with_detail("high"))
}
