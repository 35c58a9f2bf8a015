//! Narration cache: narrations and plan keyed by the uploaded file's bytes.
//!
//! Generating a lecture is dominated by AI calls. Re-uploading the same deck
//! (a second voice, a lost browser tab, a reloaded server) should not pay
//! for them again, so the analysis plan and every narration are stored under
//! the SHA-256 of the upload. The cache is independent of sessions: deleting
//! or expiring a session leaves its cache entry alone.
//!
//! ## Write-once
//!
//! Entries are written to a temp file in the cache directory and moved into
//! place with `persist_noclobber`. Two sessions finishing the same deck at
//! the same time therefore never interleave bytes; the first complete writer
//! wins and the second sees `AlreadyExists`.
//!
//! ## What counts as a hit
//!
//! Anything that is not a complete, self-consistent entry for this key is a
//! miss: a missing file, a truncated or corrupt file, a key mismatch, or a
//! narration list that does not cover every slide of the plan exactly once.

use crate::error::LectureError;
use crate::output::NarrationSegment;
use crate::plan::GlobalContextPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One cached lecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLecture {
    pub key: String,
    pub narrations: Vec<NarrationSegment>,
    pub plan: GlobalContextPlan,
    pub cached_at: DateTime<Utc>,
}

impl CachedLecture {
    fn is_complete_for(&self, key: &str) -> bool {
        self.key == key
            && self.plan.is_consistent_with(self.plan.total_slides)
            && self.narrations.len() == self.plan.total_slides
            && self
                .narrations
                .iter()
                .enumerate()
                .all(|(i, n)| n.slide_index == i && !n.text.trim().is_empty())
    }
}

/// Cache key for an upload: lowercase hex SHA-256 of its bytes.
pub fn cache_key(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct NarrationCache {
    dir: PathBuf,
}

impl NarrationCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        // Keys are hex digests; anything else never touches the filesystem.
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(self.dir.join(format!("{key}.json")))
    }

    /// The cached lecture for `key`, if a complete one exists.
    pub async fn lookup(&self, key: &str) -> Option<CachedLecture> {
        let path = self.path_for(key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<CachedLecture>(&bytes) {
            Ok(entry) if entry.is_complete_for(key) => {
                debug!("Cache hit: {} ({} narrations)", key, entry.narrations.len());
                Some(entry)
            }
            Ok(_) => {
                warn!("Ignoring inconsistent cache entry {}", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store an entry. Returns `false` if one already existed (it is kept).
    pub async fn store(
        &self,
        key: &str,
        narrations: &[NarrationSegment],
        plan: &GlobalContextPlan,
    ) -> Result<bool, LectureError> {
        let path = self
            .path_for(key)
            .ok_or_else(|| LectureError::Internal(format!("invalid cache key '{key}'")))?;
        let entry = CachedLecture {
            key: key.to_string(),
            narrations: narrations.to_vec(),
            plan: plan.clone(),
            cached_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&entry)?;
        let dir = self.dir.clone();

        let stored = tokio::task::spawn_blocking(move || write_once(&dir, &path, &json))
            .await
            .map_err(|e| LectureError::Internal(format!("cache write task panicked: {e}")))??;
        if stored {
            info!("Cached {} narrations under {}", narrations.len(), key);
        } else {
            debug!("Cache entry {} already present, keeping the first", key);
        }
        Ok(stored)
    }

    /// Remove an entry. Returns `false` if there was none.
    pub async fn clear(&self, key: &str) -> Result<bool, LectureError> {
        let Some(path) = self.path_for(key) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LectureError::io(path, e)),
        }
    }
}

fn write_once(dir: &Path, path: &Path, bytes: &[u8]) -> Result<bool, LectureError> {
    std::fs::create_dir_all(dir).map_err(|e| LectureError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| LectureError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| LectureError::io(tmp.path(), e))?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(LectureError::io(path, e.error)),
    }
}
