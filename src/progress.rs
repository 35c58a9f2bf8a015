//! Progress bookkeeping: per-phase ranges and an event callback.
//!
//! Each non-terminal [`Phase`] owns a slice of the 0–100 bar. Narration and
//! audio together get 70 points because they dominate wall-clock time; the
//! remaining phases are short and share the rest.
//!
//! | Phase | Range |
//! |-------|-------|
//! | uploading | 0–2 |
//! | parsing | 2–8 |
//! | extracting_images | 8–15 |
//! | building_context | 15–27 |
//! | generating_narrations | 27–67 |
//! | generating_audio | 67–97 |
//! | creating_viewer | 97–100 |
//!
//! Within a phase, progress is linear in completed units (slides).
//!
//! # Callbacks
//!
//! Inject an [`Arc<dyn LectureProgressCallback>`] with
//! [`crate::orchestrator::Orchestrator::with_progress_callback`] to receive
//! events as sessions move through the pipeline. Every method has a no-op
//! default so implementations override only what they need. Callbacks run
//! on the session's task; keep them quick.
//!
//! ```rust
//! use deck2lecture::{LectureProgressCallback, Phase};
//!
//! struct PrintPhases;
//!
//! impl LectureProgressCallback for PrintPhases {
//!     fn on_phase(&self, session_id: &str, phase: Phase, message: &str) {
//!         eprintln!("{session_id}: {phase} ({message})");
//!     }
//! }
//! ```

use crate::error::SlideError;
use crate::session::Phase;
use std::sync::Arc;

/// `(start, end)` percentage owned by `phase`. Terminal phases are `(100, 100)`.
pub fn phase_range(phase: Phase) -> (f32, f32) {
    match phase {
        Phase::Uploading => (0.0, 2.0),
        Phase::Parsing => (2.0, 8.0),
        Phase::ExtractingImages => (8.0, 15.0),
        Phase::BuildingContext => (15.0, 27.0),
        Phase::GeneratingNarrations => (27.0, 67.0),
        Phase::GeneratingAudio => (67.0, 97.0),
        Phase::CreatingViewer => (97.0, 100.0),
        Phase::Complete | Phase::Canceled | Phase::Error => (100.0, 100.0),
    }
}

/// Overall progress after `done` of `total` units of `phase`.
pub fn phase_progress(phase: Phase, done: usize, total: usize) -> f32 {
    let (start, end) = phase_range(phase);
    if total == 0 {
        return end;
    }
    let fraction = (done.min(total) as f32) / (total as f32);
    start + (end - start) * fraction
}

/// Called by the orchestrator as a session advances.
pub trait LectureProgressCallback: Send + Sync {
    /// A session entered `phase` (including terminal phases).
    fn on_phase(&self, session_id: &str, phase: Phase, message: &str) {
        let _ = (session_id, phase, message);
    }

    /// Narration for `slide` (0-based) is done.
    fn on_slide_narrated(&self, session_id: &str, slide: usize, total: usize) {
        let _ = (session_id, slide, total);
    }

    /// `completed` of `total` audio tracks have settled.
    fn on_audio_progress(&self, session_id: &str, completed: usize, total: usize) {
        let _ = (session_id, completed, total);
    }

    /// A slide lost something optional.
    fn on_warning(&self, session_id: &str, warning: &SlideError) {
        let _ = (session_id, warning);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl LectureProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn LectureProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_tile_the_bar_in_pipeline_order() {
        let mut previous_end = 0.0;
        for phase in Phase::PIPELINE {
            let (start, end) = phase_range(phase);
            assert_eq!(start, previous_end, "gap before {phase}");
            assert!(end > start);
            previous_end = end;
        }
        assert_eq!(previous_end, 100.0);
    }

    #[test]
    fn narration_and_audio_get_about_seventy_percent() {
        let (ns, ne) = phase_range(Phase::GeneratingNarrations);
        let (as_, ae) = phase_range(Phase::GeneratingAudio);
        assert_eq!((ne - ns) + (ae - as_), 70.0);
    }

    #[test]
    fn phase_progress_is_linear_and_clamped() {
        assert_eq!(phase_progress(Phase::GeneratingNarrations, 0, 4), 27.0);
        assert_eq!(phase_progress(Phase::GeneratingNarrations, 2, 4), 47.0);
        assert_eq!(phase_progress(Phase::GeneratingNarrations, 9, 4), 67.0);
        assert_eq!(phase_progress(Phase::GeneratingAudio, 0, 0), 97.0);
    }

    #[test]
    fn noop_callback_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_phase("s", Phase::Parsing, "Parsing");
        cb.on_slide_narrated("s", 0, 3);
        cb.on_audio_progress("s", 1, 3);
        cb.on_warning(
            "s",
            &SlideError::ImageMissing {
                slide: 0,
                detail: "x".into(),
            },
        );
    }
}
