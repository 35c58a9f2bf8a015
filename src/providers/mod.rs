//! Capability interfaces for the external services the pipeline depends on.
//!
//! The pipeline only ever talks to these traits:
//!
//! * [`AiProvider`]: structural analysis, optional vision analysis, and
//!   per-slide narration. [`llm::LlmAiProvider`] implements it on top of any
//!   `edgequake-llm` provider (OpenAI, Anthropic, Gemini, Ollama, ...).
//! * [`TtsProvider`]: text to audio with timing metadata.
//!   [`piper::PiperTts`] runs the local `piper` binary and
//!   [`openai_tts::OpenAiTts`] calls an OpenAI-compatible speech endpoint.
//!
//! Tests substitute hand-written mocks for both.

pub mod llm;
pub mod openai_tts;
pub mod piper;

use crate::error::ProviderError;
use crate::output::{TimingEntry, TimingMode, TimingTrack};
use crate::plan::{GlobalContextPlan, RawDiagram, StructuralAnalysis};
use crate::slide::SlideRecord;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── AI ───────────────────────────────────────────────────────────────────

/// A provider answer together with the tokens it cost.
#[derive(Debug, Clone)]
pub struct Analysis<T> {
    pub value: T,
    pub tokens: u64,
}

/// Everything a narration call may draw on.
#[derive(Debug, Clone, Copy)]
pub struct NarrationRequest<'a> {
    pub slide: &'a SlideRecord,
    pub plan: &'a GlobalContextPlan,
    /// Summary of the previous slide's narration; empty for the first slide.
    pub prior_summary: &'a str,
}

/// Raw narration as produced by the provider, before cleanup.
#[derive(Debug, Clone)]
pub struct NarrationDraft {
    pub text: String,
    pub tokens: u64,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One holistic pass over the whole deck.
    async fn analyze_structure(
        &self,
        slides: &[SlideRecord],
    ) -> Result<Analysis<StructuralAnalysis>, ProviderError>;

    /// Describe the diagrams on the given (diagram-heavy) slides.
    async fn analyze_diagrams(
        &self,
        slides: &[SlideRecord],
    ) -> Result<Analysis<Vec<RawDiagram>>, ProviderError>;

    async fn generate_narration(
        &self,
        request: &NarrationRequest<'_>,
    ) -> Result<NarrationDraft, ProviderError>;
}

// ── TTS ──────────────────────────────────────────────────────────────────

/// Audio written by a [`TtsProvider`].
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    pub mime_type: String,
    pub duration_secs: Option<f64>,
    pub timing: TimingTrack,
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &str;

    fn default_voice(&self) -> &str;

    fn voices(&self) -> Vec<String>;

    /// Synthesise `text` and write the audio next to `out_stem`.
    ///
    /// The provider picks the extension (`out_stem.with_extension(..)`) and
    /// reports the timing granularity it produced.
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        out_stem: &Path,
    ) -> Result<SynthesizedAudio, ProviderError>;
}

/// Public description of a registered TTS provider.
#[derive(Debug, Clone, Serialize)]
pub struct TtsProviderInfo {
    pub name: String,
    pub default_voice: String,
    pub voices: Vec<String>,
}

/// TTS providers selectable by name at upload time.
#[derive(Clone, Default)]
pub struct TtsRegistry {
    providers: BTreeMap<String, Arc<dyn TtsProvider>>,
}

impl TtsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn TtsProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn TtsProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TtsProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn describe(&self) -> Vec<TtsProviderInfo> {
        self.providers
            .values()
            .map(|p| TtsProviderInfo {
                name: p.name().to_string(),
                default_voice: p.default_voice().to_string(),
                voices: p.voices(),
            })
            .collect()
    }
}

// ── Timing estimation ────────────────────────────────────────────────────

static RE_SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]*").unwrap());

/// Split narration into sentences, keeping terminal punctuation.
pub fn split_sentences(text: &str) -> Vec<String> {
    RE_SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

/// Sentence-level timings spread over `total_secs` in proportion to word count.
///
/// Used by providers that return audio without timing marks.
pub fn estimate_sentence_timings(text: &str, total_secs: f64) -> TimingTrack {
    let sentences = split_sentences(text);
    let words: Vec<usize> = sentences
        .iter()
        .map(|s| s.split_whitespace().count().max(1))
        .collect();
    let total_words: usize = words.iter().sum();

    let mut entries = Vec::with_capacity(sentences.len());
    let mut elapsed_words = 0usize;
    for (sentence, count) in sentences.into_iter().zip(words) {
        let start_time = if total_words == 0 {
            0.0
        } else {
            total_secs * elapsed_words as f64 / total_words as f64
        };
        entries.push(TimingEntry {
            text: sentence,
            start_time: (start_time * 1000.0).round() / 1000.0,
        });
        elapsed_words += count;
    }

    TimingTrack {
        mode: TimingMode::Sentence,
        entries,
    }
}

/// Speaking time for `text` at `words_per_minute`.
pub fn estimate_duration_secs(text: &str, words_per_minute: u32) -> f64 {
    let words = text.split_whitespace().count() as f64;
    words / f64::from(words_per_minute.max(1)) * 60.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_keep_punctuation_and_skip_fragments() {
        let s = split_sentences("First point. Second point!  Is it third? ...");
        assert_eq!(s, vec!["First point.", "Second point!", "Is it third?"]);
    }

    #[test]
    fn sentence_timings_are_proportional_and_ordered() {
        let track = estimate_sentence_timings("One two. Three four five six.", 6.0);
        assert_eq!(track.mode, TimingMode::Sentence);
        assert_eq!(track.entries.len(), 2);
        assert_eq!(track.entries[0].start_time, 0.0);
        assert_eq!(track.entries[1].start_time, 2.0);
    }

    #[test]
    fn duration_uses_words_per_minute() {
        let text = vec!["word"; 150].join(" ");
        assert!((estimate_duration_secs(&text, 150) - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_registry_has_no_providers() {
        let reg = TtsRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.get("piper").is_none());
        assert!(reg.describe().is_empty());
    }
}
