//! PDF decks via pdfium: slide count, text and image extraction, rendering.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Every entry point here is synchronous; [`super::parse::DefaultDeckParser`]
//! runs them on the blocking pool so Tokio worker threads never stall on a
//! large deck.
//!
//! ## Why bind explicitly?
//!
//! `Pdfium::default()` panics when no library can be found. A server must
//! report that as an error on the session instead, so the library is bound
//! with `PDFIUM_LIB_PATH` first and the system library second.
//!
//! ## Why cap pixels, not DPI?
//!
//! Slide pages are usually 4:3 or 16:9 at arbitrary physical sizes.
//! `max_pixels` caps the longest edge regardless, which keeps viewer images
//! a predictable size.

use super::encode::encode_png;
use super::slide_text::RawSlide;
use crate::error::{LectureError, SlideError};
use crate::slide::SlideImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

fn bind_pdfium() -> Result<Pdfium, LectureError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| LectureError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn open<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, LectureError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        let detail = if err_str.to_lowercase().contains("password") {
            "the PDF is password protected".to_string()
        } else {
            format!("corrupt or unreadable PDF: {err_str}")
        };
        LectureError::Parse { detail }
    })
}

/// Number of pages, without touching page content.
pub fn count_pages(path: &Path) -> Result<usize, LectureError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;
    Ok(document.pages().len() as usize)
}

/// Text and embedded images of every page, in page order.
pub fn extract_pages(path: &Path) -> Result<Vec<RawSlide>, LectureError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;
    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let mut slides = Vec::with_capacity(pages.len() as usize);
    for (index, page) in pages.iter().enumerate() {
        let text = page
            .text()
            .map(|t| t.all())
            .map_err(|e| LectureError::Parse {
                detail: format!("page {}: {:?}", index + 1, e),
            })?;

        let mut images = Vec::new();
        for object in page.objects().iter() {
            let Some(image_object) = object.as_image_object() else {
                continue;
            };
            let id = format!("slide{}_img{}", index, images.len());
            match image_object.get_raw_image() {
                Ok(raw) => images.push(SlideImage {
                    id,
                    mime_type: "image/png".to_string(),
                    data: encode_png(&raw).ok(),
                    vision_description: None,
                }),
                Err(e) => {
                    warn!("Page {}: could not extract {}: {:?}", index + 1, id, e);
                    images.push(SlideImage {
                        id,
                        mime_type: "image/png".to_string(),
                        data: None,
                        vision_description: None,
                    });
                }
            }
        }

        debug!(
            "Page {}: {} chars, {} image(s)",
            index + 1,
            text.len(),
            images.len()
        );
        slides.push(RawSlide {
            index,
            text: normalise_page_text(&text),
            title_hint: None,
            images,
            notes: None,
        });
    }
    Ok(slides)
}

/// pdfium separates lines with `\r\n` and sometimes emits form feeds.
fn normalise_page_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace(['\r', '\u{000C}'], "\n")
        .trim()
        .to_string()
}

/// Render every page to `out_dir/slide_NNN.png`.
///
/// Returns one flag per page; a page that fails to render is reported in the
/// warnings and left without an image.
pub fn render_pages(
    path: &Path,
    out_dir: &Path,
    max_pixels: u32,
) -> Result<(Vec<bool>, Vec<SlideError>), LectureError> {
    let pdfium = bind_pdfium()?;
    let document = open(&pdfium, path)?;
    std::fs::create_dir_all(out_dir).map_err(|e| LectureError::io(out_dir, e))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut rendered = Vec::new();
    let mut warnings = Vec::new();
    for (index, page) in document.pages().iter().enumerate() {
        let target = out_dir.join(slide_image_name(index));
        let result = page
            .render_with_config(&render_config)
            .map_err(|e| format!("{:?}", e))
            .and_then(|bitmap| {
                bitmap
                    .as_image()
                    .save_with_format(&target, image::ImageFormat::Png)
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => {
                debug!("Rendered slide {} → {}", index, target.display());
                rendered.push(true);
            }
            Err(detail) => {
                warn!("Slide {}: render failed: {}", index, detail);
                warnings.push(SlideError::ImageMissing {
                    slide: index,
                    detail,
                });
                rendered.push(false);
            }
        }
    }
    Ok((rendered, warnings))
}

/// File name of a rendered slide image.
pub fn slide_image_name(index: usize) -> String {
    format!("slide_{index:03}.png")
}
