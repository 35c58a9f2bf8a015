//! Session state and its on-disk layout.
//!
//! A session is one upload on its way to becoming a lecture. Its state is a
//! plain value ([`SessionState`]) written only by the session's own task and
//! published to readers as whole snapshots; see [`crate::orchestrator`].
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/sessions/<id>/
//!     session.json          SessionState, rewritten atomically on every phase change
//!     source.pdf|.pptx      the upload
//!     slides/slide_NNN.png  viewer images (PDF only)
//!     audio/slide_NNN.wav   one file per narrated slide
//! ```
//!
//! Session ids are UUIDs. Any id that does not parse as one is rejected
//! before it is joined onto a path.

use crate::error::{LectureError, SlideError};
use crate::output::LectureBundle;
use crate::slide::DeckFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const STATE_FILE: &str = "session.json";

// ── Phase ────────────────────────────────────────────────────────────────────

/// Pipeline phase. `Complete`, `Canceled` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uploading,
    Parsing,
    ExtractingImages,
    BuildingContext,
    GeneratingNarrations,
    GeneratingAudio,
    CreatingViewer,
    Complete,
    Canceled,
    Error,
}

impl Phase {
    /// The non-terminal phases in the order a run visits them.
    pub const PIPELINE: [Phase; 7] = [
        Phase::Uploading,
        Phase::Parsing,
        Phase::ExtractingImages,
        Phase::BuildingContext,
        Phase::GeneratingNarrations,
        Phase::GeneratingAudio,
        Phase::CreatingViewer,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Canceled | Phase::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Uploading => "uploading",
            Phase::Parsing => "parsing",
            Phase::ExtractingImages => "extracting_images",
            Phase::BuildingContext => "building_context",
            Phase::GeneratingNarrations => "generating_narrations",
            Phase::GeneratingAudio => "generating_audio",
            Phase::CreatingViewer => "creating_viewer",
            Phase::Complete => "complete",
            Phase::Canceled => "canceled",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── State ────────────────────────────────────────────────────────────────────

/// Options fixed at upload time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub enable_vision: bool,
    pub tts_provider: String,
    pub voice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: Phase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    pub filename: String,
    pub format: DeckFormat,
    pub client: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub phase: Phase,
    /// Percent complete, never decreasing.
    pub progress: f32,
    pub message: String,
    pub total_slides: Option<usize>,
    pub cancel_requested: bool,
    pub error: Option<String>,
    pub options: SessionOptions,
    pub cache_key: String,
    #[serde(default)]
    pub warnings: Vec<SlideError>,
    #[serde(default)]
    pub phase_history: Vec<PhaseTransition>,
    pub lecture: Option<LectureBundle>,
}

impl SessionState {
    pub fn new(
        filename: &str,
        format: DeckFormat,
        client: &str,
        options: SessionOptions,
        cache_key: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(48));
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            format,
            client: client.to_string(),
            created_at: now,
            expires_at: now + ttl,
            phase: Phase::Uploading,
            progress: 0.0,
            message: "Upload received".to_string(),
            total_slides: None,
            cancel_requested: false,
            error: None,
            options,
            cache_key,
            warnings: Vec::new(),
            phase_history: vec![PhaseTransition {
                phase: Phase::Uploading,
                at: now,
            }],
            lecture: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Move to `phase`. Terminal states are never left.
    pub fn enter(&mut self, phase: Phase, message: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.message = message.into();
        if self.phase == phase {
            return;
        }
        self.phase = phase;
        self.phase_history.push(PhaseTransition {
            phase,
            at: Utc::now(),
        });
    }

    /// Raise progress to `progress` (never lowers it) and update the message.
    pub fn advance(&mut self, progress: f32, message: impl Into<String>) {
        if self.phase.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        self.message = message.into();
    }

    pub fn complete(&mut self, lecture: LectureBundle) {
        self.warnings = lecture.warnings.clone();
        self.lecture = Some(lecture);
        self.progress = 100.0;
        self.enter(Phase::Complete, "Lecture ready");
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.enter(Phase::Error, error.clone());
        self.error = Some(error);
    }

    pub fn mark_canceled(&mut self) {
        self.enter(Phase::Canceled, "Canceled");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            phase: self.phase,
            progress: self.progress,
            message: self.message.clone(),
            complete: self.phase == Phase::Complete,
            total_slides: self.total_slides,
            cancel_requested: self.cancel_requested,
            error: self.error.clone(),
            warnings: self.warnings.clone(),
        }
    }

    /// Listing entry; `None` unless the lecture is complete.
    pub fn summary(&self) -> Option<SessionSummary> {
        let lecture = self.lecture.as_ref()?;
        (self.phase == Phase::Complete).then(|| SessionSummary {
            session_id: self.id.clone(),
            filename: self.filename.clone(),
            created_at: self.created_at,
            total_slides: lecture.total_slides,
            options: self.options.clone(),
        })
    }
}

/// What `GET /session/{id}/status` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: Phase,
    pub progress: f32,
    pub message: String,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_slides: Option<usize>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<SlideError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub total_slides: usize,
    pub options: SessionOptions,
}

// ── Store ────────────────────────────────────────────────────────────────────

/// `true` if `id` is a well-formed session id.
pub fn is_valid_id(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

/// Persisted session directories under one root.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn slides_dir(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("slides")
    }

    pub fn audio_dir(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("audio")
    }

    pub fn source_path(&self, id: &str, format: DeckFormat) -> PathBuf {
        self.session_dir(id)
            .join(format!("source.{}", format.extension()))
    }

    /// Create the session's directories and write the upload.
    pub async fn create(
        &self,
        id: &str,
        format: DeckFormat,
        bytes: &[u8],
    ) -> Result<PathBuf, LectureError> {
        for dir in [self.slides_dir(id), self.audio_dir(id)] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| LectureError::io(&dir, e))?;
        }
        let source = self.source_path(id, format);
        tokio::fs::write(&source, bytes)
            .await
            .map_err(|e| LectureError::io(&source, e))?;
        Ok(source)
    }

    /// Atomically replace `session.json`.
    pub async fn save(&self, state: &SessionState) -> Result<(), LectureError> {
        let dir = self.session_dir(&state.id);
        let json = serde_json::to_vec_pretty(state)?;
        tokio::task::spawn_blocking(move || write_atomic(&dir, &json))
            .await
            .map_err(|e| LectureError::Internal(format!("session write task panicked: {e}")))?
    }

    /// Every readable persisted session. Unreadable ones are logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<SessionState>, LectureError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LectureError::io(&self.root, e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LectureError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_valid_id(&name) {
                continue;
            }
            let path = entry.path().join(STATE_FILE);
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Skipping session {}: {}", name, e);
                    continue;
                }
            };
            match serde_json::from_slice::<SessionState>(&bytes) {
                Ok(state) if state.id == name => sessions.push(state),
                Ok(_) => warn!("Skipping session {}: id does not match directory", name),
                Err(e) => warn!("Skipping session {}: {}", name, e),
            }
        }
        debug!("Loaded {} persisted session(s)", sessions.len());
        Ok(sessions)
    }

    /// Delete the session directory. Returns `false` if it did not exist.
    pub async fn remove(&self, id: &str) -> Result<bool, LectureError> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let dir = self.session_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LectureError::io(dir, e)),
        }
    }
}

fn write_atomic(dir: &Path, bytes: &[u8]) -> Result<(), LectureError> {
    // The directory is made once by `create`. A missing one means the
    // session was deleted and must not come back.
    if !dir.is_dir() {
        return Err(LectureError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "session directory is gone"),
        ));
    }
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| LectureError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| LectureError::io(tmp.path(), e))?;
    let target = dir.join(STATE_FILE);
    tmp.persist(&target)
        .map_err(|e| LectureError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state() -> SessionState {
        SessionState::new(
            "deck.pdf",
            DeckFormat::Pdf,
            "127.0.0.1",
            SessionOptions {
                enable_vision: false,
                tts_provider: "piper".into(),
                voice: "en_US-amy-medium".into(),
            },
            "ab".repeat(32),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn phases_serialize_snake_case() {
        assert_eq!(
            serde_json::to_value(Phase::GeneratingNarrations).unwrap(),
            "generating_narrations"
        );
        for p in Phase::PIPELINE {
            assert!(!p.is_terminal());
            assert_eq!(serde_json::to_value(p).unwrap(), p.as_str());
        }
    }

    #[test]
    fn progress_never_decreases() {
        let mut s = state();
        s.advance(40.0, "a");
        s.advance(10.0, "b");
        assert_eq!(s.progress, 40.0);
        assert_eq!(s.message, "b");
        s.advance(250.0, "c");
        assert_eq!(s.progress, 100.0);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut s = state();
        s.enter(Phase::Parsing, "Parsing");
        s.mark_canceled();
        s.enter(Phase::BuildingContext, "late");
        s.fail("late error");
        assert_eq!(s.phase, Phase::Canceled);
        assert!(s.error.is_none());
        let phases: Vec<_> = s.phase_history.iter().map(|t| t.phase).collect();
        assert_eq!(phases, vec![Phase::Uploading, Phase::Parsing, Phase::Canceled]);
    }

    #[test]
    fn summary_only_for_complete_sessions() {
        let s = state();
        assert!(s.summary().is_none());
        assert!(!s.status().complete);
    }

    #[test]
    fn expiry_follows_ttl() {
        let s = state();
        assert!(!s.is_expired_at(s.created_at));
        assert!(s.is_expired_at(s.created_at + chrono::Duration::hours(1)));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let mut s = state();
        store.create(&s.id, s.format, b"%PDF-1.7").await.unwrap();
        store.save(&s).await.unwrap();
        s.enter(Phase::Parsing, "Parsing deck");
        store.save(&s).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![s.clone()]);
        assert!(store.source_path(&s.id, s.format).exists());

        assert!(store.remove(&s.id).await.unwrap());
        assert!(!store.remove(&s.id).await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_skips_foreign_and_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("not-a-uuid")).unwrap();
        let id = Uuid::new_v4().to_string();
        std::fs::create_dir_all(dir.path().join(&id)).unwrap();
        std::fs::write(dir.path().join(&id).join(STATE_FILE), b"{").unwrap();

        let store = SessionStore::new(dir.path());
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(!store.remove("../../etc").await.unwrap());
    }

    #[tokio::test]
    async fn save_after_remove_does_not_recreate_the_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let s = state();
        store.create(&s.id, s.format, b"%PDF-1.7").await.unwrap();
        assert!(store.remove(&s.id).await.unwrap());

        assert!(store.save(&s).await.is_err());
        assert!(!dir.path().join(&s.id).exists());
        assert!(store.load_all().await.unwrap().is_empty());
    }
}
