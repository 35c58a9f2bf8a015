//! The deck parser seam: turn an uploaded file into slides and slide images.
//!
//! [`DeckParser`] has three operations because the orchestrator needs them at
//! three different moments:
//!
//! 1. [`DeckParser::count_slides`] during upload validation. It must be cheap
//!    (directory listing for PPTX, page tree for PDF) so an oversized deck is
//!    rejected before any real work starts.
//! 2. [`DeckParser::parse`] in the `parsing` phase.
//! 3. [`DeckParser::render_slides`] in the `extracting_images` phase.
//!
//! [`DefaultDeckParser`] dispatches on [`DeckFormat`] and runs the blocking
//! container code on Tokio's blocking pool.

use super::slide_text::{build_deck, RawSlide};
use super::{pdf, pptx};
use crate::error::{LectureError, SlideError};
use crate::slide::{DeckFormat, SlideRecord};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Result of rendering slide images for the viewer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutcome {
    /// One flag per slide: `true` if `slide_NNN.png` was written.
    pub rendered: Vec<bool>,
    /// Slides that could not be rendered.
    pub warnings: Vec<SlideError>,
}

impl RenderOutcome {
    /// No images for any of `count` slides, without warnings.
    pub fn none(count: usize) -> Self {
        Self {
            rendered: vec![false; count],
            warnings: Vec::new(),
        }
    }
}

#[async_trait]
pub trait DeckParser: Send + Sync {
    /// Number of slides in the deck, without extracting content.
    async fn count_slides(&self, path: &Path, format: DeckFormat) -> Result<usize, LectureError>;

    /// Every slide in document order, with contiguous 0-based indices.
    async fn parse(&self, path: &Path, format: DeckFormat) -> Result<Vec<SlideRecord>, LectureError>;

    /// Write `slide_NNN.png` files into `out_dir`.
    async fn render_slides(
        &self,
        path: &Path,
        format: DeckFormat,
        out_dir: &Path,
    ) -> Result<RenderOutcome, LectureError>;
}

/// pdfium for PDF, zip + XML for PPTX.
#[derive(Debug, Clone)]
pub struct DefaultDeckParser {
    /// Longest edge of rendered slide images in pixels.
    pub max_rendered_pixels: u32,
}

impl Default for DefaultDeckParser {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 1600,
        }
    }
}

async fn blocking<T, F>(label: &'static str, f: F) -> Result<T, LectureError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LectureError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LectureError::Internal(format!("{label} task panicked: {e}")))?
}

#[async_trait]
impl DeckParser for DefaultDeckParser {
    async fn count_slides(&self, path: &Path, format: DeckFormat) -> Result<usize, LectureError> {
        let path = path.to_path_buf();
        match format {
            DeckFormat::Pdf => blocking("count", move || pdf::count_pages(&path)).await,
            DeckFormat::Pptx => blocking("count", move || pptx::count_slides(&path)).await,
        }
    }

    async fn parse(&self, path: &Path, format: DeckFormat) -> Result<Vec<SlideRecord>, LectureError> {
        let path: PathBuf = path.to_path_buf();
        let raw: Vec<RawSlide> = match format {
            DeckFormat::Pdf => blocking("parse", move || pdf::extract_pages(&path)).await?,
            DeckFormat::Pptx => blocking("parse", move || pptx::extract_slides(&path)).await?,
        };
        let slides = build_deck(raw);
        info!(
            "Parsed {} slides ({} with constructs, {} incremental builds)",
            slides.len(),
            slides.iter().filter(|s| !s.constructs.is_empty()).count(),
            slides.iter().filter(|s| s.is_incremental_build()).count()
        );
        Ok(slides)
    }

    async fn render_slides(
        &self,
        path: &Path,
        format: DeckFormat,
        out_dir: &Path,
    ) -> Result<RenderOutcome, LectureError> {
        match format {
            DeckFormat::Pdf => {
                let path = path.to_path_buf();
                let out_dir = out_dir.to_path_buf();
                let max = self.max_rendered_pixels;
                let (rendered, warnings) =
                    blocking("render", move || pdf::render_pages(&path, &out_dir, max)).await?;
                Ok(RenderOutcome { rendered, warnings })
            }
            DeckFormat::Pptx => {
                let count = self.count_slides(path, format).await?;
                Ok(RenderOutcome::none(count))
            }
        }
    }
}
