//! Session orchestrator: the per-upload state machine.
//!
//! [`Orchestrator::start`] validates an upload, creates a session, and
//! returns its id straight away; the phases then run on a background task:
//!
//! ```text
//! uploading → parsing → extracting_images → building_context
//!           → generating_narrations → generating_audio → creating_viewer → complete
//! ```
//!
//! `canceled` and `error` are reachable from every non-terminal phase.
//!
//! ## State ownership
//!
//! Each session's [`SessionState`] sits in a `tokio::sync::watch` channel.
//! The session's task does the writing; the one outside write is
//! [`Orchestrator::cancel`] flagging the request. Every write runs inside
//! `send_modify`, under the channel's lock, so a cancel and the task's final
//! transition are ordered: either the cancel lands first and the run ends
//! `canceled`, or the run is already terminal and the cancel is a conflict.
//! Readers (status query, SSE subscriber) always see a whole snapshot. The
//! state is persisted to `session.json` on every phase change.
//!
//! ## Cancellation
//!
//! [`Orchestrator::cancel`] only raises a flag. The task checks it at phase
//! boundaries, before each slide's narration, before each slide's audio
//! starts, and once more before publishing a finished lecture. Calls already
//! in flight finish and their results are discarded.
//!
//! [`Orchestrator::delete`] cancels too, then waits for the task to stop
//! before removing the session directory, so no write lands after removal.
//!
//! ## Cache
//!
//! Before analysis the narration cache is consulted with the SHA-256 of the
//! upload. On a hit the plan and narrations come from the cache and no AI
//! call is made, but the session still walks through `building_context` and
//! `generating_narrations` (reporting "Loaded from cache") so every run has
//! the same phase history.

use crate::cache::{cache_key, CachedLecture, NarrationCache};
use crate::config::LectureConfig;
use crate::error::{LectureError, SlideError};
use crate::output::{AudioArtifact, LectureBundle, NarrationSegment};
use crate::pipeline::context::GlobalContextBuilder;
use crate::pipeline::input::{sanitize_filename, validate_upload};
use crate::pipeline::narrate::{prior_summary, ConceptTracker, NarrationGenerator};
use crate::pipeline::parse::{DeckParser, RenderOutcome};
use crate::pipeline::pdf::slide_image_name;
use crate::pipeline::synth::AudioSynthesizer;
use crate::plan::GlobalContextPlan;
use crate::progress::{phase_progress, phase_range, NoopProgressCallback, ProgressCallback};
use crate::providers::{AiProvider, TtsProvider, TtsProviderInfo, TtsRegistry};
use crate::ratelimit::{RateLimiter, RunPermit};
use crate::session::{
    is_valid_id, Phase, SessionOptions, SessionState, SessionStatus, SessionStore, SessionSummary,
};
use crate::slide::{DeckFormat, SlideRecord};
use crate::stream::{status_stream, StatusStream};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An uploaded deck as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Client identity for rate limiting (usually the remote IP).
    pub client: String,
}

/// Per-upload overrides. `None` falls back to the configured default.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub enable_vision: Option<bool>,
    pub tts_provider: Option<String>,
    pub voice: Option<String>,
}

struct SessionHandle {
    state: watch::Sender<SessionState>,
    cancel: Arc<AtomicBool>,
    /// Set when the session is deleted while its task still runs.
    deleted: AtomicBool,
    /// The running pipeline; `None` for restored sessions.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    fn new(state: SessionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self {
            state: tx,
            cancel: Arc::new(AtomicBool::new(false)),
            deleted: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

/// Why a run stopped before producing a lecture.
enum Halt {
    Canceled,
    Failed(LectureError),
}

impl From<LectureError> for Halt {
    fn from(e: LectureError) -> Self {
        Halt::Failed(e)
    }
}

/// Narrations and plan, from the cache or freshly generated.
struct Narrated {
    plan: GlobalContextPlan,
    narrations: Vec<NarrationSegment>,
    warnings: Vec<SlideError>,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<LectureConfig>,
    parser: Arc<dyn DeckParser>,
    ai: Arc<dyn AiProvider>,
    tts: TtsRegistry,
    store: SessionStore,
    cache: NarrationCache,
    limiter: RateLimiter,
    sessions: Arc<RwLock<HashMap<String, Arc<SessionHandle>>>>,
    callback: ProgressCallback,
}

impl Orchestrator {
    pub fn new(
        config: LectureConfig,
        parser: Arc<dyn DeckParser>,
        ai: Arc<dyn AiProvider>,
        tts: TtsRegistry,
    ) -> Self {
        Self {
            store: SessionStore::new(config.sessions_dir()),
            cache: NarrationCache::new(config.cache_dir()),
            limiter: RateLimiter::from_config(&config),
            config: Arc::new(config),
            parser,
            ai,
            tts,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            callback: Arc::new(NoopProgressCallback),
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &LectureConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &NarrationCache {
        &self.cache
    }

    pub fn tts_providers(&self) -> Vec<TtsProviderInfo> {
        self.tts.describe()
    }

    // ── Session table ────────────────────────────────────────────────────────

    fn handle(&self, id: &str) -> Result<Arc<SessionHandle>, LectureError> {
        let not_found = || LectureError::SessionNotFound { id: id.to_string() };
        if !is_valid_id(id) {
            return Err(not_found());
        }
        let handle = self
            .sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(not_found)?;
        if handle.state.borrow().is_expired_at(Utc::now()) {
            return Err(not_found());
        }
        Ok(handle)
    }

    fn insert(&self, handle: Arc<SessionHandle>) {
        let id = handle.state.borrow().id.clone();
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, handle);
    }

    fn take(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id)
    }

    fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    // ── Start ────────────────────────────────────────────────────────────────

    fn resolve_tts(
        &self,
        options: &StartOptions,
    ) -> Result<(Arc<dyn TtsProvider>, String), LectureError> {
        let name = options
            .tts_provider
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.config.default_tts_provider);
        let provider = self.tts.get(name).ok_or_else(|| {
            LectureError::InvalidOption(format!("unknown TTS provider '{name}'"))
        })?;

        let voice = match options.voice.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => provider.default_voice().to_string(),
        };
        let known = provider.voices();
        if !known.is_empty() && !known.contains(&voice) {
            return Err(LectureError::InvalidOption(format!(
                "voice '{voice}' is not available for provider '{name}'"
            )));
        }
        Ok((provider, voice))
    }

    /// Validate `upload`, create its session, and start the pipeline.
    ///
    /// Returns the new session id as soon as the session exists. Every
    /// rejection (format, size, slide count, options, rate limit) happens
    /// here, before any phase runs.
    pub async fn start(
        &self,
        upload: Upload,
        options: StartOptions,
    ) -> Result<String, LectureError> {
        let filename = sanitize_filename(&upload.filename);
        let format = validate_upload(&filename, &upload.bytes, self.config.max_file_size)?;
        let (tts, voice) = self.resolve_tts(&options)?;

        let session_options = SessionOptions {
            enable_vision: options.enable_vision.unwrap_or(self.config.enable_vision),
            tts_provider: tts.name().to_string(),
            voice,
        };
        let mut state = SessionState::new(
            &filename,
            format,
            &upload.client,
            session_options,
            cache_key(&upload.bytes),
            self.config.session_ttl,
        );
        let id = state.id.clone();

        let source = self.store.create(&id, format, &upload.bytes).await?;
        let admitted = self
            .admit(&filename, &source, format, &upload.client)
            .await;
        let (total, permit) = match admitted {
            Ok(v) => v,
            Err(e) => {
                if let Err(cleanup) = self.store.remove(&id).await {
                    warn!("Failed to remove rejected session {}: {}", id, cleanup);
                }
                return Err(e);
            }
        };

        state.total_slides = Some(total);
        state.advance(phase_range(Phase::Uploading).1, "Upload accepted");
        self.store.save(&state).await?;

        let handle = Arc::new(SessionHandle::new(state));
        let this = self.clone();
        let task = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { this.run(handle, source, format, tts, permit).await }
        });
        *handle.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(task);
        self.insert(handle);
        info!(
            session = %id,
            client = %upload.client,
            "Session created for '{}' ({} slides, {})",
            filename,
            total,
            format
        );
        Ok(id)
    }

    /// Slide-count ceiling, then the rate limit. Only an admitted upload is
    /// recorded against the client.
    async fn admit(
        &self,
        filename: &str,
        source: &Path,
        format: DeckFormat,
        client: &str,
    ) -> Result<(usize, RunPermit), LectureError> {
        let count = tokio::time::timeout(
            self.config.parse_timeout,
            self.parser.count_slides(source, format),
        )
        .await
        .map_err(|_| LectureError::UnsupportedFormat {
            filename: filename.to_string(),
            detail: "timed out while counting slides".into(),
        })?
        .map_err(|e| match e {
            LectureError::Parse { detail } => LectureError::UnsupportedFormat {
                filename: filename.to_string(),
                detail: format!("the deck could not be read: {detail}"),
            },
            other => other,
        })?;

        if count == 0 {
            return Err(LectureError::EmptyDeck {
                filename: filename.to_string(),
            });
        }
        if count > self.config.max_slides {
            return Err(LectureError::TooManySlides {
                count,
                limit: self.config.max_slides,
            });
        }
        let permit = self.limiter.acquire(client)?;
        Ok((count, permit))
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn get_status(&self, id: &str) -> Result<SessionStatus, LectureError> {
        Ok(self.handle(id)?.state.borrow().status())
    }

    /// Request cancellation. Takes effect at the session's next checkpoint.
    ///
    /// Once this returns `Ok` the session ends `canceled`, never `complete`.
    pub fn cancel(&self, id: &str) -> Result<SessionStatus, LectureError> {
        let handle = self.handle(id)?;
        let mut outcome = Err(Phase::Error);
        handle.state.send_if_modified(|s| {
            if s.phase.is_terminal() {
                outcome = Err(s.phase);
                return false;
            }
            handle.cancel.store(true, Ordering::SeqCst);
            s.cancel_requested = true;
            s.message = "Cancel requested".to_string();
            outcome = Ok(s.status());
            true
        });
        match outcome {
            Ok(status) => {
                info!(session = %id, "Cancel requested during {}", status.phase);
                Ok(status)
            }
            Err(phase) => Err(LectureError::Conflict {
                id: id.to_string(),
                phase: phase.to_string(),
            }),
        }
    }

    pub fn get_lecture(&self, id: &str) -> Result<LectureBundle, LectureError> {
        let handle = self.handle(id)?;
        let state = handle.state.borrow();
        match (&state.lecture, state.phase) {
            (Some(lecture), Phase::Complete) => Ok(lecture.clone()),
            _ => Err(LectureError::LectureNotReady {
                id: id.to_string(),
                phase: state.phase.to_string(),
            }),
        }
    }

    /// Completed, unexpired sessions, newest first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let now = Utc::now();
        let mut out: Vec<SessionSummary> = self
            .handles()
            .iter()
            .filter_map(|h| {
                let state = h.state.borrow();
                if state.is_expired_at(now) {
                    None
                } else {
                    state.summary()
                }
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Watch a session's state. The receiver starts at the current snapshot.
    pub fn subscribe(&self, id: &str) -> Result<watch::Receiver<SessionState>, LectureError> {
        Ok(self.handle(id)?.state.subscribe())
    }

    /// Status snapshots until the session reaches a terminal phase.
    pub fn events(&self, id: &str) -> Result<StatusStream, LectureError> {
        Ok(status_stream(self.subscribe(id)?))
    }

    /// Rendered image for slide `n`.
    pub async fn slide_image_path(&self, id: &str, n: usize) -> Result<PathBuf, LectureError> {
        self.handle(id)?;
        let path = self.store.slides_dir(id).join(slide_image_name(n));
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            _ => Err(LectureError::AssetNotFound {
                id: id.to_string(),
                what: format!("image for slide {n}"),
            }),
        }
    }

    /// Audio file and its MIME type for slide `n`.
    pub fn audio_path(&self, id: &str, n: usize) -> Result<(PathBuf, String), LectureError> {
        let handle = self.handle(id)?;
        let state = handle.state.borrow();
        let artifact = state
            .lecture
            .as_ref()
            .and_then(|l| l.audio_for(n))
            .ok_or_else(|| LectureError::AssetNotFound {
                id: id.to_string(),
                what: format!("audio for slide {n}"),
            })?;
        Ok((
            self.store.session_dir(id).join(&artifact.path),
            artifact.mime_type.clone(),
        ))
    }

    /// Remove a session and everything persisted for it.
    ///
    /// A running session is canceled first and its task awaited, so the
    /// directory is removed only after the last write.
    pub async fn delete(&self, id: &str) -> Result<(), LectureError> {
        let handle = if is_valid_id(id) { self.take(id) } else { None };
        if let Some(handle) = &handle {
            handle.deleted.store(true, Ordering::SeqCst);
            handle.cancel.store(true, Ordering::SeqCst);
            if let Some(task) = handle.take_task() {
                if let Err(e) = task.await {
                    warn!(session = %id, "Session task ended abnormally: {}", e);
                }
            }
        }
        let removed = self.store.remove(id).await?;
        if handle.is_none() && !removed {
            return Err(LectureError::SessionNotFound { id: id.to_string() });
        }
        info!(session = %id, "Session deleted");
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Reload persisted sessions after a restart.
    ///
    /// Expired sessions are purged. Sessions that were mid-run cannot resume
    /// (their task is gone) and are moved to `error`. Returns how many
    /// sessions were restored.
    pub async fn restore(&self) -> Result<usize, LectureError> {
        let now = Utc::now();
        let mut restored = 0;
        for mut state in self.store.load_all().await? {
            if state.is_expired_at(now) {
                self.store.remove(&state.id).await?;
                debug!(session = %state.id, "Purged expired session on startup");
                continue;
            }
            if !state.phase.is_terminal() {
                state.fail("Interrupted by server restart");
                self.store.save(&state).await?;
                warn!(session = %state.id, "Session was mid-run at shutdown, marked as error");
            }
            self.insert(Arc::new(SessionHandle::new(state)));
            restored += 1;
        }
        info!("Restored {} session(s)", restored);
        Ok(restored)
    }

    /// Delete sessions whose TTL has passed. Returns the removed ids.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .handles()
            .iter()
            .filter_map(|h| {
                let state = h.state.borrow();
                state.is_expired_at(now).then(|| state.id.clone())
            })
            .collect();

        let mut removed = Vec::new();
        for id in expired {
            match self.delete(&id).await {
                Ok(()) => removed.push(id),
                Err(e) => warn!(session = %id, "Failed to purge expired session: {}", e),
            }
        }
        if !removed.is_empty() {
            info!("Purged {} expired session(s)", removed.len());
        }
        removed
    }

    /// Run [`Self::sweep_expired`] every `every`.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.sweep_expired().await;
            }
        })
    }

    // ── Run ──────────────────────────────────────────────────────────────────

    async fn run(
        self,
        handle: Arc<SessionHandle>,
        source: PathBuf,
        format: DeckFormat,
        tts: Arc<dyn TtsProvider>,
        permit: RunPermit,
    ) {
        let _permit = permit;
        let id = handle.state.borrow().id.clone();

        let outcome = self.drive(&handle, &source, format, tts).await;
        // The flag is read under the channel lock: a cancel accepted after
        // the last checkpoint still wins over completion.
        let state = publish(&handle, |s| match outcome {
            Ok(_) if handle.cancel.load(Ordering::SeqCst) => s.mark_canceled(),
            Ok(lecture) => s.complete(lecture),
            Err(Halt::Canceled) => s.mark_canceled(),
            Err(Halt::Failed(e)) => s.fail(e.to_string()),
        });
        match state.phase {
            Phase::Complete => info!(session = %id, "Lecture complete ({} warning(s))", state.warnings.len()),
            Phase::Canceled => info!(session = %id, "Run canceled"),
            _ => warn!(session = %id, "Run failed: {}", state.message),
        }
        self.callback.on_phase(&id, state.phase, &state.message);
        self.persist(&handle).await;
    }

    async fn persist(&self, handle: &SessionHandle) {
        if handle.deleted.load(Ordering::SeqCst) {
            return;
        }
        let state = handle.snapshot();
        if let Err(e) = self.store.save(&state).await {
            warn!(session = %state.id, "Failed to persist session: {}", e);
        }
    }

    fn checkpoint(&self, handle: &SessionHandle) -> Result<(), Halt> {
        if handle.cancel.load(Ordering::SeqCst) {
            Err(Halt::Canceled)
        } else {
            Ok(())
        }
    }

    async fn enter(&self, handle: &SessionHandle, phase: Phase, message: &str) -> Result<(), Halt> {
        self.checkpoint(handle)?;
        let state = publish(handle, |s| {
            s.enter(phase, message);
            s.advance(phase_range(phase).0, message);
        });
        debug!(session = %state.id, "Entered {}", phase);
        self.callback.on_phase(&state.id, phase, message);
        self.persist(handle).await;
        Ok(())
    }

    async fn drive(
        &self,
        handle: &SessionHandle,
        source: &Path,
        format: DeckFormat,
        tts: Arc<dyn TtsProvider>,
    ) -> Result<LectureBundle, Halt> {
        let initial = handle.snapshot();
        let id = initial.id.clone();
        let options = initial.options.clone();

        // ── Parsing ──────────────────────────────────────────────────────────
        self.enter(handle, Phase::Parsing, "Parsing deck").await?;
        let slides = tokio::time::timeout(self.config.parse_timeout, self.parser.parse(source, format))
            .await
            .map_err(|_| LectureError::Parse {
                detail: format!("timed out after {}s", self.config.parse_timeout.as_secs()),
            })??;
        if slides.is_empty() {
            return Err(LectureError::EmptyDeck {
                filename: initial.filename.clone(),
            }
            .into());
        }
        let total = slides.len();
        publish(handle, |s| {
            s.total_slides = Some(total);
            s.advance(phase_range(Phase::Parsing).1, format!("Parsed {total} slides"));
        });

        // ── Extracting images ────────────────────────────────────────────────
        self.enter(handle, Phase::ExtractingImages, "Rendering slide images").await?;
        let render = self.render(&id, source, format, total).await;
        let mut warnings: Vec<SlideError> = render.warnings;
        for w in &warnings {
            self.callback.on_warning(&id, w);
        }
        let rendered = render.rendered;
        publish(handle, |s| {
            s.warnings = warnings.clone();
            s.advance(
                phase_range(Phase::ExtractingImages).1,
                format!("Rendered {} slide image(s)", rendered.iter().filter(|r| **r).count()),
            );
        });

        // ── Context + narration ──────────────────────────────────────────────
        let cached = self.lookup_cache(&initial.cache_key, total).await;
        let from_cache = cached.is_some();
        let mut narrated = match cached {
            Some(entry) => self.replay_cache(handle, entry).await?,
            None => {
                let fallback_title = Path::new(&initial.filename)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| initial.filename.clone());
                self.generate(handle, &slides, options.enable_vision, &fallback_title)
                    .await?
            }
        };
        if !from_cache {
            if let Err(e) = self
                .cache
                .store(&initial.cache_key, &narrated.narrations, &narrated.plan)
                .await
            {
                warn!(session = %id, "Failed to cache narrations: {}", e);
            }
        }

        for w in &narrated.warnings {
            self.callback.on_warning(&id, w);
        }
        warnings.append(&mut narrated.warnings);
        publish(handle, |s| s.warnings = warnings.clone());

        // ── Audio ────────────────────────────────────────────────────────────
        self.enter(handle, Phase::GeneratingAudio, "Synthesising audio").await?;
        let synth = AudioSynthesizer::new(
            tts,
            self.config.retry_policy(),
            self.config.synthesis_timeout,
            self.config.tts_concurrency,
        );
        let audio_dir = self.store.audio_dir(&id);
        let outcome = synth
            .synthesize_all(
                &narrated.narrations,
                &options.voice,
                &audio_dir,
                &handle.cancel,
                |done, total| {
                    publish(handle, |s| {
                        s.advance(
                            phase_progress(Phase::GeneratingAudio, done, total),
                            format!("Audio {done}/{total}"),
                        );
                    });
                    self.callback.on_audio_progress(&id, done, total);
                },
            )
            .await;
        if outcome.canceled {
            return Err(Halt::Canceled);
        }
        for w in &outcome.warnings {
            self.callback.on_warning(&id, w);
        }
        warnings.extend(outcome.warnings);
        let session_dir = self.store.session_dir(&id);
        let audio: Vec<AudioArtifact> = outcome
            .audio
            .into_iter()
            .map(|mut a| {
                if let Ok(rel) = a.path.strip_prefix(&session_dir) {
                    a.path = rel.to_path_buf();
                }
                a
            })
            .collect();

        // ── Viewer ───────────────────────────────────────────────────────────
        self.enter(handle, Phase::CreatingViewer, "Assembling lecture").await?;
        Ok(LectureBundle::assemble(
            &initial.filename,
            &slides,
            &rendered,
            narrated.plan,
            narrated.narrations,
            audio,
            synth.provider_name(),
            &options.voice,
            options.enable_vision,
            from_cache,
            warnings,
        ))
    }

    /// Slide images are optional: a render failure leaves every slide without one.
    async fn render(&self, id: &str, source: &Path, format: DeckFormat, total: usize) -> RenderOutcome {
        let out_dir = self.store.slides_dir(id);
        let result = tokio::time::timeout(
            self.config.parse_timeout,
            self.parser.render_slides(source, format, &out_dir),
        )
        .await;
        let detail = match result {
            Ok(Ok(mut outcome)) => {
                outcome.rendered.resize(total, false);
                return outcome;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "rendering timed out".to_string(),
        };
        warn!(session = %id, "Slide rendering failed: {}", detail);
        RenderOutcome {
            rendered: vec![false; total],
            warnings: (0..total)
                .map(|slide| SlideError::ImageMissing {
                    slide,
                    detail: detail.clone(),
                })
                .collect(),
        }
    }

    async fn lookup_cache(&self, key: &str, total: usize) -> Option<CachedLecture> {
        let entry = self.cache.lookup(key).await?;
        (entry.plan.total_slides == total).then_some(entry)
    }

    async fn replay_cache(
        &self,
        handle: &SessionHandle,
        entry: CachedLecture,
    ) -> Result<Narrated, Halt> {
        self.enter(handle, Phase::BuildingContext, "Loaded from cache").await?;
        publish(handle, |s| {
            s.advance(phase_range(Phase::BuildingContext).1, "Loaded from cache")
        });
        self.enter(handle, Phase::GeneratingNarrations, "Loaded from cache").await?;
        publish(handle, |s| {
            s.advance(
                phase_range(Phase::GeneratingNarrations).1,
                format!("Loaded {} narrations from cache", entry.narrations.len()),
            )
        });
        Ok(Narrated {
            plan: entry.plan,
            narrations: entry.narrations,
            warnings: Vec::new(),
        })
    }

    async fn generate(
        &self,
        handle: &SessionHandle,
        slides: &[SlideRecord],
        enable_vision: bool,
        fallback_title: &str,
    ) -> Result<Narrated, Halt> {
        let id = handle.state.borrow().id.clone();
        let policy = self.config.retry_policy();

        self.enter(handle, Phase::BuildingContext, "Analysing lecture structure").await?;
        let builder = GlobalContextBuilder::new(
            Arc::clone(&self.ai),
            policy,
            self.config.analysis_timeout,
        );
        let context = builder.analyze(slides, enable_vision, fallback_title).await?;
        if !context.warnings.is_empty() {
            warn!(
                session = %id,
                "Vision pass failed for {} slide(s), narrating from text",
                context.warnings.len()
            );
        }
        let plan = context.plan;
        publish(handle, |s| {
            s.advance(
                phase_range(Phase::BuildingContext).1,
                format!("Planned '{}' in {} section(s)", plan.lecture_title, plan.sections.len()),
            )
        });

        self.enter(handle, Phase::GeneratingNarrations, "Writing narration").await?;
        let generator = NarrationGenerator::new(
            Arc::clone(&self.ai),
            policy,
            self.config.narration_timeout,
            self.config.words_per_minute,
            self.config.redact_terms.clone(),
        );
        let total = slides.len();
        let mut concepts = ConceptTracker::new();
        let mut narrations: Vec<NarrationSegment> = Vec::with_capacity(total);
        let mut summary = String::new();
        for slide in slides {
            self.checkpoint(handle)?;
            let segment = generator
                .generate(slide, &plan, &summary, &mut concepts)
                .await?;
            summary = prior_summary(slide, &segment);
            narrations.push(segment);

            let done = narrations.len();
            publish(handle, |s| {
                s.advance(
                    phase_progress(Phase::GeneratingNarrations, done, total),
                    format!("Narrated slide {done}/{total}"),
                )
            });
            self.callback.on_slide_narrated(&id, slide.index, total);
        }
        Ok(Narrated {
            plan,
            narrations,
            warnings: context.warnings,
        })
    }
}

/// Modify the state under the channel lock. Returns the published snapshot.
fn publish(handle: &SessionHandle, f: impl FnOnce(&mut SessionState)) -> SessionState {
    let mut published = None;
    handle.state.send_modify(|s| {
        f(s);
        published = Some(s.clone());
    });
    published.unwrap_or_else(|| handle.snapshot())
}
