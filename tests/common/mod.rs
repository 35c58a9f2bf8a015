//! Hand-written mock providers shared by the integration tests.
//!
//! Every mock counts its calls with atomics so tests can assert that a
//! path made (or did not make) provider calls.

#![allow(dead_code)]

use async_trait::async_trait;
use deck2lecture::error::{LectureError, ProviderError};
use deck2lecture::plan::{RawDiagram, StructuralAnalysis};
use deck2lecture::providers::{
    estimate_sentence_timings, Analysis, NarrationDraft, NarrationRequest, SynthesizedAudio,
};
use deck2lecture::slide::SlideImage;
use deck2lecture::{
    AiProvider, DeckFormat, DeckParser, LectureConfig, Orchestrator, RenderOutcome, SessionStatus,
    SlideRecord, SlideType, TtsProvider, TtsRegistry,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Parser ───────────────────────────────────────────────────────────────────

pub fn slide(index: usize) -> SlideRecord {
    SlideRecord {
        index,
        slide_type: if index == 0 {
            SlideType::Title
        } else {
            SlideType::Content
        },
        title: Some(format!("Topic {index}")),
        bullets: vec![format!("Point about topic {index}")],
        body: format!("Topic {index}\nPoint about topic {index}"),
        images: vec![],
        notes: None,
        constructs: vec![],
        builds_on: None,
        new_content: None,
    }
}

/// A diagram-heavy slide carrying one embedded image, eligible for the vision pass.
pub fn diagram_slide(index: usize) -> SlideRecord {
    SlideRecord {
        slide_type: SlideType::DiagramHeavy,
        images: vec![SlideImage {
            id: format!("slide{index}_img0"),
            mime_type: "image/png".into(),
            data: Some("iVBORw0KGgo=".into()),
            vision_description: None,
        }],
        ..slide(index)
    }
}

pub struct MockParser {
    pub slides: Vec<SlideRecord>,
    /// Reported by `count_slides` instead of `slides.len()`.
    pub reported_count: Option<usize>,
    pub count_calls: AtomicUsize,
    pub parse_calls: AtomicUsize,
}

impl MockParser {
    pub fn with_slides(n: usize) -> Self {
        Self {
            slides: (0..n).map(slide).collect(),
            reported_count: None,
            count_calls: AtomicUsize::new(0),
            parse_calls: AtomicUsize::new(0),
        }
    }

    /// Make the slides at `indices` diagram-heavy.
    pub fn with_diagrams(mut self, indices: &[usize]) -> Self {
        for &i in indices {
            self.slides[i] = diagram_slide(i);
        }
        self
    }

    pub fn reporting(mut self, count: usize) -> Self {
        self.reported_count = Some(count);
        self
    }
}

#[async_trait]
impl DeckParser for MockParser {
    async fn count_slides(&self, _path: &Path, _format: DeckFormat) -> Result<usize, LectureError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reported_count.unwrap_or(self.slides.len()))
    }

    async fn parse(&self, _path: &Path, _format: DeckFormat) -> Result<Vec<SlideRecord>, LectureError> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.slides.clone())
    }

    async fn render_slides(
        &self,
        _path: &Path,
        _format: DeckFormat,
        out_dir: &Path,
    ) -> Result<RenderOutcome, LectureError> {
        std::fs::create_dir_all(out_dir).map_err(|e| LectureError::Internal(e.to_string()))?;
        for s in &self.slides {
            std::fs::write(out_dir.join(format!("slide_{:03}.png", s.index)), b"\x89PNG\r\n")
                .map_err(|e| LectureError::Internal(e.to_string()))?;
        }
        Ok(RenderOutcome {
            rendered: vec![true; self.slides.len()],
            warnings: vec![],
        })
    }
}

// ── AI ───────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockAi {
    pub structure_calls: AtomicUsize,
    pub diagram_calls: AtomicUsize,
    pub narration_calls: AtomicUsize,
    pub fail_structure: bool,
    pub fail_diagrams: bool,
    /// Returned by `analyze_diagrams`.
    pub diagrams: Vec<RawDiagram>,
    pub fail_narration_for: Option<usize>,
    pub narration_delay: Duration,
    /// Prior summary seen by each narration call, in call order.
    pub summaries: Mutex<Vec<(usize, String)>>,
}

impl MockAi {
    pub fn total_calls(&self) -> usize {
        self.structure_calls.load(Ordering::SeqCst)
            + self.diagram_calls.load(Ordering::SeqCst)
            + self.narration_calls.load(Ordering::SeqCst)
    }
}

pub fn narration_text(index: usize) -> String {
    format!("This is the narration for slide {index}. It explains topic {index} in plain words.")
}

#[async_trait]
impl AiProvider for MockAi {
    fn name(&self) -> &str {
        "mock-ai"
    }

    async fn analyze_structure(
        &self,
        slides: &[SlideRecord],
    ) -> Result<Analysis<StructuralAnalysis>, ProviderError> {
        self.structure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_structure {
            return Err(ProviderError::Permanent("analysis rejected".into()));
        }
        let raw: StructuralAnalysis = serde_json::from_value(serde_json::json!({
            "lecture_title": "Mock Lecture",
            "sections": [{"title": "All", "start_slide": 0, "end_slide": slides.len().saturating_sub(1), "summary": "everything"}],
            "terminology": {"topic": "a thing to talk about"},
            "cross_references": {"2": [0, "Section 1", 2.0]}
        }))
        .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(Analysis {
            value: raw,
            tokens: 100,
        })
    }

    async fn analyze_diagrams(
        &self,
        _slides: &[SlideRecord],
    ) -> Result<Analysis<Vec<RawDiagram>>, ProviderError> {
        self.diagram_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_diagrams {
            return Err(ProviderError::Permanent("vision model unavailable".into()));
        }
        Ok(Analysis {
            value: self.diagrams.clone(),
            tokens: 50,
        })
    }

    async fn generate_narration(
        &self,
        request: &NarrationRequest<'_>,
    ) -> Result<NarrationDraft, ProviderError> {
        self.narration_calls.fetch_add(1, Ordering::SeqCst);
        let index = request.slide.index;
        self.summaries
            .lock()
            .unwrap()
            .push((index, request.prior_summary.to_string()));
        if !self.narration_delay.is_zero() {
            tokio::time::sleep(self.narration_delay).await;
        }
        if self.fail_narration_for == Some(index) {
            return Err(ProviderError::Permanent("content policy".into()));
        }
        Ok(NarrationDraft {
            text: narration_text(index),
            tokens: 20,
        })
    }
}

// ── TTS ──────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockTts {
    pub calls: AtomicUsize,
    pub fail_slides: HashSet<usize>,
}

pub const MOCK_VOICE: &str = "test-voice";

fn slide_from_stem(stem: &Path) -> Option<usize> {
    stem.file_name()?
        .to_str()?
        .strip_prefix("slide_")?
        .parse()
        .ok()
}

#[async_trait]
impl TtsProvider for MockTts {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_voice(&self) -> &str {
        MOCK_VOICE
    }

    fn voices(&self) -> Vec<String> {
        vec![MOCK_VOICE.to_string()]
    }

    async fn synthesize(
        &self,
        text: &str,
        _voice: &str,
        out_stem: &Path,
    ) -> Result<SynthesizedAudio, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if slide_from_stem(out_stem).is_some_and(|i| self.fail_slides.contains(&i)) {
            return Err(ProviderError::Permanent("voice engine crashed".into()));
        }
        let path = out_stem.with_extension("wav");
        tokio::fs::write(&path, b"RIFF....WAVE")
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        Ok(SynthesizedAudio {
            path,
            mime_type: "audio/wav".into(),
            duration_secs: Some(2.0),
            timing: estimate_sentence_timings(text, 2.0),
        })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub dir: TempDir,
    pub parser: Arc<MockParser>,
    pub ai: Arc<MockAi>,
    pub tts: Arc<MockTts>,
    pub orchestrator: Orchestrator,
}

pub fn test_config(dir: &Path) -> deck2lecture::LectureConfigBuilder {
    LectureConfig::builder()
        .data_dir(dir)
        .default_tts_provider("mock")
        .max_retries(1)
        .retry_backoff_ms(1)
}

impl Harness {
    pub fn new(parser: MockParser, ai: MockAi, tts: MockTts) -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path()).build().unwrap();
        Self::with_config(dir, config, parser, ai, tts)
    }

    pub fn with_config(
        dir: TempDir,
        config: LectureConfig,
        parser: MockParser,
        ai: MockAi,
        tts: MockTts,
    ) -> Self {
        let parser = Arc::new(parser);
        let ai = Arc::new(ai);
        let tts = Arc::new(tts);
        let orchestrator = Orchestrator::new(
            config,
            parser.clone(),
            ai.clone(),
            TtsRegistry::new().with(tts.clone()),
        );
        Self {
            dir,
            parser,
            ai,
            tts,
            orchestrator,
        }
    }
}

/// A byte string that passes PDF validation; `tag` makes the cache key unique.
pub fn pdf_bytes(tag: &str) -> Vec<u8> {
    format!("%PDF-1.7\n% {tag}\n").into_bytes()
}

/// Poll until the session reaches a terminal phase.
pub async fn wait_terminal(orchestrator: &Orchestrator, id: &str) -> SessionStatus {
    for _ in 0..500 {
        let status = orchestrator.get_status(id).unwrap();
        if status.phase.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {id} did not finish");
}
