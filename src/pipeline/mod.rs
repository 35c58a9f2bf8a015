//! Pipeline stages for deck-to-lecture conversion.
//!
//! Each submodule implements exactly one transformation step. Keeping stages
//! separate makes each independently testable and lets the orchestrator swap
//! providers without touching stage logic.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ parse ──▶ context ──▶ narrate ──▶ synth
//! (validate) (slides)  (plan)    (per slide)  (audio)
//! ```
//!
//! 1. [`input`]: accept or reject an upload (extension, magic bytes, size)
//! 2. [`parse`]: the [`parse::DeckParser`] seam; [`pdf`] and [`pptx`] read
//!    the containers and [`slide_text`] derives titles, bullets, constructs and
//!    incremental builds
//! 3. [`context`]: one whole-deck analysis call (plus optional vision pass)
//! 4. [`narrate`]: one narration call per slide, in order, cleaned by
//!    [`postprocess`]
//! 5. [`synth`]: concurrent TTS calls with bounded parallelism
//!
//! Every provider call goes through [`retry::call_with_retry`].

pub mod context;
pub mod encode;
pub mod input;
pub mod narrate;
pub mod parse;
pub mod pdf;
pub mod postprocess;
pub mod pptx;
pub mod retry;
pub mod slide_text;
pub mod synth;
