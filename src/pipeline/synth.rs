//! Audio synthesis: one TTS call per narration, run concurrently.
//!
//! Unlike narration, audio has no inter-slide dependency, so slides are
//! synthesised through `buffer_unordered(concurrency)`. The ceiling exists
//! because TTS back ends (local and hosted alike) degrade or rate-limit
//! under load.
//!
//! A slide whose audio still fails after all retries does not fail the run:
//! it becomes a [`SlideError::AudioMissing`] warning and the viewer plays
//! that slide silently.
//!
//! Cancellation is checked before each slide starts; calls already in flight
//! finish normally.

use super::retry::{call_with_retry, RetryPolicy};
use crate::error::{LectureError, SlideError};
use crate::output::{AudioArtifact, NarrationSegment};
use crate::providers::TtsProvider;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the audio phase produced.
#[derive(Debug, Default)]
pub struct SynthesisOutcome {
    /// Successful artifacts, ordered by slide index.
    pub audio: Vec<AudioArtifact>,
    /// One warning per slide without audio.
    pub warnings: Vec<SlideError>,
    /// True if the cancel flag stopped slides from starting.
    pub canceled: bool,
}

enum Unit {
    Done(AudioArtifact),
    Failed(SlideError),
    Skipped,
}

pub struct AudioSynthesizer {
    tts: Arc<dyn TtsProvider>,
    policy: RetryPolicy,
    timeout: Duration,
    concurrency: usize,
}

/// File stem for a slide's audio; the provider adds the extension.
pub fn audio_stem(dir: &Path, slide: usize) -> std::path::PathBuf {
    dir.join(format!("slide_{slide:03}"))
}

impl AudioSynthesizer {
    pub fn new(
        tts: Arc<dyn TtsProvider>,
        policy: RetryPolicy,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            tts,
            policy,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.tts.name()
    }

    /// Synthesise one narration into `out_dir`.
    pub async fn synthesize(
        &self,
        narration: &NarrationSegment,
        voice: &str,
        out_dir: &Path,
    ) -> Result<AudioArtifact, LectureError> {
        let slide = narration.slide_index;
        let stem = audio_stem(out_dir, slide);
        let label = format!("audio slide {slide}");

        let audio = call_with_retry(&self.policy, self.timeout, &label, || {
            self.tts.synthesize(&narration.text, voice, &stem)
        })
        .await
        .map_err(|f| LectureError::Synthesis {
            slide,
            attempts: f.attempts,
            detail: f.last.to_string(),
        })?;

        debug!(
            "Slide {}: audio {} ({:?} timing, {} entries)",
            slide,
            audio.path.display(),
            audio.timing.mode,
            audio.timing.entries.len()
        );
        Ok(AudioArtifact {
            slide_index: slide,
            path: audio.path,
            mime_type: audio.mime_type,
            duration_secs: audio.duration_secs,
            timing: audio.timing,
        })
    }

    /// Synthesise every narration with bounded concurrency.
    ///
    /// `on_done(completed, total)` runs after each slide settles (success or
    /// failure), in completion order.
    pub async fn synthesize_all<F>(
        &self,
        narrations: &[NarrationSegment],
        voice: &str,
        out_dir: &Path,
        cancel: &AtomicBool,
        mut on_done: F,
    ) -> SynthesisOutcome
    where
        F: FnMut(usize, usize),
    {
        let total = narrations.len();
        // Each unit owns its segment; the stream is polled inside a spawned task.
        let mut units = stream::iter(narrations.iter().cloned().map(|narration| async move {
            if cancel.load(Ordering::SeqCst) {
                return Unit::Skipped;
            }
            let narration = &narration;
            match self.synthesize(narration, voice, out_dir).await {
                Ok(artifact) => Unit::Done(artifact),
                Err(LectureError::Synthesis {
                    slide,
                    attempts,
                    detail,
                }) => Unit::Failed(SlideError::AudioMissing {
                    slide,
                    attempts,
                    detail,
                }),
                Err(other) => Unit::Failed(SlideError::AudioMissing {
                    slide: narration.slide_index,
                    attempts: 0,
                    detail: other.to_string(),
                }),
            }
        }))
        .buffer_unordered(self.concurrency);

        let mut outcome = SynthesisOutcome::default();
        let mut completed = 0;
        while let Some(unit) = units.next().await {
            match unit {
                Unit::Done(artifact) => outcome.audio.push(artifact),
                Unit::Failed(warning) => {
                    warn!("{}", warning);
                    outcome.warnings.push(warning);
                }
                Unit::Skipped => {
                    outcome.canceled = true;
                    continue;
                }
            }
            completed += 1;
            on_done(completed, total);
        }

        outcome.audio.sort_by_key(|a| a.slide_index);
        outcome.warnings.sort_by_key(SlideError::slide);
        outcome
    }
}
