//! Error types for the deck2lecture library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`LectureError`]: **Fatal** for the operation that returned it. Upload
//!   validation, session queries, and pipeline phases that cannot continue
//!   (parse failure, analysis or narration exhausted its retries) all surface
//!   here. The orchestrator records the message on the session and stops.
//!
//! * [`SlideError`]: **Non-fatal**. A single slide lost something optional
//!   (its audio track) but the lecture is still usable. Stored in the bundle
//!   as a warning so the viewer can flag it.
//!
//! * [`ProviderError`]: what a capability provider (AI, TTS) returns from one
//!   call. The retry loop uses [`ProviderError::is_retryable`] to decide
//!   whether another attempt can help before converting the last failure into
//!   a [`LectureError`] or a [`SlideError`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the deck2lecture library.
#[derive(Debug, Error)]
pub enum LectureError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The upload is neither a PDF nor a PPTX (checked by extension and magic bytes).
    #[error("Unsupported file '{filename}': {detail}\nOnly PDF and PPTX decks are accepted.")]
    UnsupportedFormat { filename: String, detail: String },

    /// The upload exceeds the configured byte ceiling.
    #[error("File is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// The deck has more slides than the configured ceiling.
    #[error("Deck has {count} slides, the limit is {limit}")]
    TooManySlides { count: usize, limit: usize },

    /// The deck parsed but contains no slides.
    #[error("Deck '{filename}' contains no slides")]
    EmptyDeck { filename: String },

    /// An upload option names something that does not exist (e.g. an unknown TTS provider).
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// The client exhausted its run quota for the rolling window.
    #[error("Rate limit exceeded for client '{client}': {detail}")]
    RateLimited {
        client: String,
        detail: String,
        retry_after_secs: Option<u64>,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The deck could not be parsed or rendered.
    #[error("Failed to parse deck: {detail}")]
    Parse { detail: String },

    /// The whole-deck analysis failed after all retries.
    #[error("Lecture analysis failed after {attempts} attempt(s): {detail}")]
    Analysis { attempts: u32, detail: String },

    /// Narration for one slide failed after all retries; the run cannot complete.
    #[error("Narration for slide {slide} failed after {attempts} attempt(s): {detail}")]
    Generation {
        slide: usize,
        attempts: u32,
        detail: String,
    },

    /// Audio for one slide failed after all retries.
    ///
    /// The orchestrator downgrades this to [`SlideError::AudioMissing`]; it is
    /// only fatal to callers that invoke the synthesizer directly.
    #[error("Audio for slide {slide} failed after {attempts} attempt(s): {detail}")]
    Synthesis {
        slide: usize,
        attempts: u32,
        detail: String,
    },

    // ── Session errors ────────────────────────────────────────────────────
    /// No live session has this id (unknown, deleted, or expired).
    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    /// The session exists but has not produced a lecture.
    #[error("Lecture for session '{id}' is not available (phase: {phase})")]
    LectureNotReady { id: String, phase: String },

    /// The session exists but has no such slide image or audio track.
    #[error("Session '{id}' has no {what}")]
    AssetNotFound { id: String, what: String },

    /// The requested transition is impossible from the session's current phase.
    #[error("Session '{id}' is already {phase}")]
    Conflict { id: String, phase: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a persisted file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ── Provider / config errors ──────────────────────────────────────────
    /// The configured LLM provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium, or install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    PayloadTooLarge,
    RateLimited,
    NotFound,
    Conflict,
    Pipeline,
    Internal,
}

impl LectureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LectureError::UnsupportedFormat { .. }
            | LectureError::TooManySlides { .. }
            | LectureError::EmptyDeck { .. }
            | LectureError::InvalidOption(_) => ErrorKind::Validation,
            LectureError::FileTooLarge { .. } => ErrorKind::PayloadTooLarge,
            LectureError::RateLimited { .. } => ErrorKind::RateLimited,
            LectureError::SessionNotFound { .. }
            | LectureError::LectureNotReady { .. }
            | LectureError::AssetNotFound { .. } => ErrorKind::NotFound,
            LectureError::Conflict { .. } => ErrorKind::Conflict,
            LectureError::Parse { .. }
            | LectureError::Analysis { .. }
            | LectureError::Generation { .. }
            | LectureError::Synthesis { .. } => ErrorKind::Pipeline,
            LectureError::Io { .. }
            | LectureError::Serialization(_)
            | LectureError::ProviderNotConfigured { .. }
            | LectureError::PdfiumBindingFailed(_)
            | LectureError::InvalidConfig(_)
            | LectureError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LectureError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for LectureError {
    fn from(e: serde_json::Error) -> Self {
        LectureError::Serialization(e.to_string())
    }
}

/// A non-fatal error for a single slide.
///
/// Stored in [`crate::output::LectureBundle::warnings`]. The lecture still
/// completes; the viewer shows the slide without the missing part.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlideError {
    /// Audio synthesis failed permanently; the slide has narration text but no audio.
    #[error("Slide {slide}: audio missing after {attempts} attempt(s): {detail}")]
    AudioMissing {
        slide: usize,
        attempts: u32,
        detail: String,
    },

    /// The slide could not be rendered to an image for the viewer.
    #[error("Slide {slide}: image unavailable: {detail}")]
    ImageMissing { slide: usize, detail: String },

    /// The vision pass failed; the slide's diagrams are narrated from text alone.
    #[error("Slide {slide}: diagrams not analysed: {detail}")]
    VisionMissing { slide: usize, detail: String },
}

impl SlideError {
    pub fn slide(&self) -> usize {
        match self {
            SlideError::AudioMissing { slide, .. }
            | SlideError::ImageMissing { slide, .. }
            | SlideError::VisionMissing { slide, .. } => *slide,
        }
    }
}

/// Failure of a single call to an AI or TTS provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Network blip, 5xx, 429: worth another attempt.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Bad credentials, rejected input: retrying will not help.
    #[error("permanent provider failure: {0}")]
    Permanent(String),

    /// The call did not finish within its time budget.
    #[error("provider call timed out after {0}s")]
    Timeout(u64),

    /// The provider answered but the payload could not be understood.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Timeouts and malformed payloads are treated like transient failures.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Permanent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_slides_display() {
        let e = LectureError::TooManySlides {
            count: 212,
            limit: 150,
        };
        let msg = e.to_string();
        assert!(msg.contains("212"), "got: {msg}");
        assert!(msg.contains("150"), "got: {msg}");
        assert_eq!(e.kind(), ErrorKind::Validation);
    }

    #[test]
    fn generation_error_names_slide() {
        let e = LectureError::Generation {
            slide: 4,
            attempts: 3,
            detail: "upstream 503".into(),
        };
        assert!(e.to_string().contains("slide 4"));
        assert!(e.to_string().contains("3 attempt"));
        assert_eq!(e.kind(), ErrorKind::Pipeline);
    }

    #[test]
    fn session_errors_map_to_query_kinds() {
        let nf = LectureError::SessionNotFound { id: "abc".into() };
        assert_eq!(nf.kind(), ErrorKind::NotFound);
        let not_ready = LectureError::LectureNotReady {
            id: "abc".into(),
            phase: "parsing".into(),
        };
        assert_eq!(not_ready.kind(), ErrorKind::NotFound);
        let conflict = LectureError::Conflict {
            id: "abc".into(),
            phase: "complete".into(),
        };
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn file_too_large_is_its_own_kind() {
        let e = LectureError::FileTooLarge {
            size: 60,
            limit: 50,
        };
        assert_eq!(e.kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn only_permanent_provider_errors_stop_retries() {
        assert!(ProviderError::Transient("x".into()).is_retryable());
        assert!(ProviderError::Timeout(30).is_retryable());
        assert!(ProviderError::Malformed("x".into()).is_retryable());
        assert!(!ProviderError::Permanent("bad key".into()).is_retryable());
    }

    #[test]
    fn slide_error_serializes_with_kind_tag() {
        let w = SlideError::AudioMissing {
            slide: 2,
            attempts: 3,
            detail: "tts down".into(),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "audio_missing");
        assert_eq!(json["slide"], 2);
        assert_eq!(w.slide(), 2);
    }
}
