//! Output types: narration, audio, and the assembled lecture bundle.

use crate::error::SlideError;
use crate::plan::{GlobalContextPlan, KeyDiagram};
use crate::slide::{SlideImage, SlideRecord, SlideType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Spoken narration for one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub slide_index: usize,
    /// Plain spoken-form text: no markup, no LaTeX, no identifying names.
    pub text: String,
    pub estimated_duration_secs: f64,
    /// Earlier slides this narration explicitly builds on.
    pub referenced_slides: Vec<usize>,
    /// Concepts first introduced on this slide.
    pub introduced_concepts: Vec<String>,
    pub next_slide_teaser: Option<String>,
    pub tokens_used: u64,
    pub generated_at: DateTime<Utc>,
}

impl NarrationSegment {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Granularity of the timing entries a TTS provider produced.
///
/// Reported by the provider itself. Consumers never guess it from the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    Word,
    Sentence,
}

/// One timed span of the audio: a word or a sentence depending on [`TimingMode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingEntry {
    pub text: String,
    /// Seconds from the start of the slide's audio.
    pub start_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingTrack {
    pub mode: TimingMode,
    pub entries: Vec<TimingEntry>,
}

/// Synthesised audio for one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub slide_index: usize,
    pub path: PathBuf,
    pub mime_type: String,
    pub duration_secs: Option<f64>,
    pub timing: TimingTrack,
}

/// Per-slide metadata shown by the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideSummary {
    pub index: usize,
    pub title: String,
    pub slide_type: SlideType,
    pub has_image: bool,
    pub has_audio: bool,
    pub is_incremental_build: bool,
    /// Embedded images with their vision descriptions (pixels are not included).
    #[serde(default)]
    pub images: Vec<SlideImage>,
}

/// The complete lecture, persisted with the session once it reaches `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LectureBundle {
    pub filename: String,
    pub total_slides: usize,
    pub slide_titles: Vec<String>,
    pub slides: Vec<SlideSummary>,
    pub narrations: Vec<NarrationSegment>,
    /// Slide index → timing track. Serialised with string keys ("0", "1", ...).
    pub word_timings: BTreeMap<usize, TimingTrack>,
    /// Slide index → audio artifact for every slide that has audio.
    pub audio: BTreeMap<usize, AudioArtifact>,
    pub tts_provider: String,
    pub voice: String,
    pub vision_enabled: bool,
    pub from_cache: bool,
    pub warnings: Vec<SlideError>,
    pub plan: GlobalContextPlan,
}

impl LectureBundle {
    /// Assemble the bundle from the products of every phase.
    ///
    /// `rendered` lists which slides have an image on disk.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        filename: &str,
        slides: &[SlideRecord],
        rendered: &[bool],
        plan: GlobalContextPlan,
        narrations: Vec<NarrationSegment>,
        audio: Vec<AudioArtifact>,
        tts_provider: &str,
        voice: &str,
        vision_enabled: bool,
        from_cache: bool,
        warnings: Vec<SlideError>,
    ) -> Self {
        let audio: BTreeMap<usize, AudioArtifact> =
            audio.into_iter().map(|a| (a.slide_index, a)).collect();
        let word_timings = audio
            .iter()
            .map(|(idx, a)| (*idx, a.timing.clone()))
            .collect();

        let summaries = slides
            .iter()
            .map(|s| SlideSummary {
                index: s.index,
                title: s.display_title(),
                slide_type: s.slide_type,
                has_image: rendered.get(s.index).copied().unwrap_or(false),
                has_audio: audio.contains_key(&s.index),
                is_incremental_build: s.is_incremental_build(),
                images: described_images(s, &plan),
            })
            .collect::<Vec<_>>();

        let mut warnings = warnings;
        warnings.sort_by_key(SlideError::slide);

        Self {
            filename: filename.to_string(),
            total_slides: slides.len(),
            slide_titles: summaries.iter().map(|s| s.title.clone()).collect(),
            slides: summaries,
            narrations,
            word_timings,
            audio,
            tts_provider: tts_provider.to_string(),
            voice: voice.to_string(),
            vision_enabled,
            from_cache,
            warnings,
            plan,
        }
    }

    pub fn audio_for(&self, slide: usize) -> Option<&AudioArtifact> {
        self.audio.get(&slide)
    }
}

fn describes(diagram: &KeyDiagram, image: &SlideImage) -> bool {
    diagram.image_id.as_deref() == Some(image.id.as_str())
}

/// Copy a slide's images and attach the plan's diagram descriptions.
///
/// A description naming an image id goes to that image. One without a
/// matching id goes to the first image still lacking a description.
fn described_images(slide: &SlideRecord, plan: &GlobalContextPlan) -> Vec<SlideImage> {
    let diagrams: Vec<&KeyDiagram> = plan
        .key_diagrams
        .iter()
        .filter(|d| d.slide_index == slide.index)
        .collect();

    let mut images: Vec<SlideImage> = slide
        .images
        .iter()
        .map(|img| SlideImage {
            data: None,
            vision_description: diagrams
                .iter()
                .find(|d| describes(d, img))
                .map(|d| d.description.clone()),
            ..img.clone()
        })
        .collect();

    for d in diagrams {
        if slide.images.iter().any(|img| describes(d, img)) {
            continue;
        }
        if let Some(img) = images.iter_mut().find(|i| i.vision_description.is_none()) {
            img.vision_description = Some(d.description.clone());
        }
    }
    images
}
