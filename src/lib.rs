//! # deck2lecture
//!
//! Turn a slide deck (PDF or PPTX) into a narrated lecture: per-slide spoken
//! narration written by an LLM, synthesised to audio, and served through a
//! session API that a viewer can poll or subscribe to.
//!
//! ## Why this crate?
//!
//! Reading slides aloud one at a time produces a disjointed lecture: every
//! slide re-introduces the topic, definitions are explained twice, and
//! diagrams are ignored. This crate first builds a whole-deck plan (sections,
//! terminology, cross-references, key diagrams), then narrates slides in
//! order with that plan and a summary of the previous slide in hand, so the
//! narration flows like a lecturer talking through the deck.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate   extension + magic bytes, size, slide count, rate limit
//!  ├─ 2. Parse      slides: text, bullets, images, notes, constructs (pdfium / zip)
//!  ├─ 3. Render     slide_NNN.png for the viewer (PDF)
//!  ├─ 4. Context    one holistic analysis call (+ optional vision pass)
//!  ├─ 5. Narrate    one call per slide, in order, cleaned for speech
//!  ├─ 6. Audio      concurrent TTS calls with timing metadata
//!  └─ 7. Viewer     LectureBundle persisted with the session
//! ```
//!
//! Steps 4–5 are skipped (but still reported) when the same file was
//! narrated before: narrations are cached by the SHA-256 of the upload.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deck2lecture::providers::{llm::LlmAiProvider, piper::PiperTts};
//! use deck2lecture::{DefaultDeckParser, LectureConfig, Orchestrator, TtsRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LectureConfig::builder().data_dir("data").build()?;
//!     let ai = Arc::new(LlmAiProvider::from_config(&config)?);
//!     let tts = TtsRegistry::new().with(Arc::new(PiperTts::new("piper", "voices")));
//!
//!     let orchestrator = Orchestrator::new(config, Arc::new(DefaultDeckParser::default()), ai, tts);
//!     orchestrator.restore().await?;
//!
//!     let app = deck2lecture::api::router(orchestrator);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deck2lecture` server binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod prompts;
pub mod providers;
pub mod ratelimit;
pub mod session;
pub mod slide;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{cache_key, NarrationCache};
pub use config::{LectureConfig, LectureConfigBuilder};
pub use error::{ErrorKind, LectureError, ProviderError, SlideError};
pub use orchestrator::{Orchestrator, StartOptions, Upload};
pub use output::{
    AudioArtifact, LectureBundle, NarrationSegment, SlideSummary, TimingEntry, TimingMode,
    TimingTrack,
};
pub use pipeline::parse::{DeckParser, DefaultDeckParser, RenderOutcome};
pub use plan::GlobalContextPlan;
pub use progress::{LectureProgressCallback, NoopProgressCallback, ProgressCallback};
pub use providers::{AiProvider, TtsProvider, TtsRegistry};
pub use ratelimit::RateLimiter;
pub use session::{Phase, SessionOptions, SessionState, SessionStatus, SessionSummary};
pub use slide::{DeckFormat, SlideRecord, SlideType};
pub use stream::status_stream;
