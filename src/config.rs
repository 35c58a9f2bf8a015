//! Configuration for the lecture pipeline and its server.
//!
//! Every knob lives in [`LectureConfig`], built via [`LectureConfigBuilder`].
//! One struct keeps limits, retry policy, timeouts and provider settings in a
//! single place that can be logged at startup and shared across sessions.

use crate::error::LectureError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the lecture pipeline.
///
/// Built via [`LectureConfig::builder()`] or using [`LectureConfig::default()`].
///
/// # Example
/// ```rust
/// use deck2lecture::LectureConfig;
///
/// let config = LectureConfig::builder()
///     .data_dir("/var/lib/deck2lecture")
///     .max_slides(80)
///     .tts_concurrency(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct LectureConfig {
    /// Root for persisted sessions and the narration cache. Default: `./data`.
    pub data_dir: PathBuf,

    // ── Upload limits ────────────────────────────────────────────────────
    /// Largest accepted upload in bytes. Default: 50 MB.
    pub max_file_size: u64,

    /// Largest accepted deck in slides. Default: 150.
    ///
    /// Checked with a cheap slide count before the pipeline starts, so an
    /// oversized deck never costs a single provider call.
    pub max_slides: usize,

    /// Runs a single client may start per rolling window. Default: 5.
    pub rate_limit_max_runs: usize,

    /// Length of the rolling rate-limit window. Default: 24 h.
    pub rate_limit_window: Duration,

    /// Runs a single client may have in flight at once. Default: 2.
    pub max_concurrent_runs_per_client: usize,

    /// Identify clients by the first `X-Forwarded-For` hop instead of the
    /// socket peer. Only safe behind a proxy that overwrites the header.
    /// Default: false.
    pub trust_forwarded_for: bool,

    /// How long a session stays addressable after creation. Default: 48 h.
    pub session_ttl: Duration,

    // ── Retry policy ─────────────────────────────────────────────────────
    /// Retries after the first attempt for analysis, narration and synthesis calls. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    // ── Timeouts ─────────────────────────────────────────────────────────
    /// Parsing or rendering the whole deck. Default: 120 s.
    pub parse_timeout: Duration,

    /// One structural or vision analysis call. Default: 180 s.
    pub analysis_timeout: Duration,

    /// One narration call. Default: 90 s.
    pub narration_timeout: Duration,

    /// One synthesis call. Default: 120 s.
    pub synthesis_timeout: Duration,

    // ── Audio ────────────────────────────────────────────────────────────
    /// Concurrent TTS calls per session. Default: 4.
    ///
    /// Audio has no inter-slide dependency, but TTS back ends rate-limit
    /// aggressively; this is a ceiling, not a target.
    pub tts_concurrency: usize,

    /// Speaking rate used for duration estimates and estimated timings. Default: 150.
    pub words_per_minute: u32,

    /// TTS provider used when the upload does not name one. Default: "piper".
    pub default_tts_provider: String,

    /// Run the vision pass over diagram-heavy slides when the upload does not say. Default: false.
    pub enable_vision: bool,

    /// Extra strings scrubbed from every narration (course codes, names).
    pub redact_terms: Vec<String>,

    // ── LLM ──────────────────────────────────────────────────────────────
    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub llm_provider: Option<Arc<dyn LLMProvider>>,

    /// Temperature for structural and vision analysis. Default: 0.1.
    pub analysis_temperature: f32,

    /// Temperature for narration. Default: 0.3.
    pub narration_temperature: f32,

    /// Output token ceiling for the analysis call. Default: 8000.
    pub analysis_max_tokens: usize,

    /// Output token ceiling for one narration. Default: 2000.
    pub narration_max_tokens: usize,
}

impl Default for LectureConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_file_size: 50 * 1024 * 1024,
            max_slides: 150,
            rate_limit_max_runs: 5,
            rate_limit_window: Duration::from_secs(24 * 60 * 60),
            max_concurrent_runs_per_client: 2,
            trust_forwarded_for: false,
            session_ttl: Duration::from_secs(48 * 60 * 60),
            max_retries: 2,
            retry_backoff_ms: 500,
            parse_timeout: Duration::from_secs(120),
            analysis_timeout: Duration::from_secs(180),
            narration_timeout: Duration::from_secs(90),
            synthesis_timeout: Duration::from_secs(120),
            tts_concurrency: 4,
            words_per_minute: 150,
            default_tts_provider: "piper".to_string(),
            enable_vision: false,
            redact_terms: Vec::new(),
            model: None,
            provider_name: None,
            llm_provider: None,
            analysis_temperature: 0.1,
            narration_temperature: 0.3,
            analysis_max_tokens: 8000,
            narration_max_tokens: 2000,
        }
    }
}

impl fmt::Debug for LectureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LectureConfig")
            .field("data_dir", &self.data_dir)
            .field("max_file_size", &self.max_file_size)
            .field("max_slides", &self.max_slides)
            .field("rate_limit_max_runs", &self.rate_limit_max_runs)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("session_ttl", &self.session_ttl)
            .field("max_retries", &self.max_retries)
            .field("tts_concurrency", &self.tts_concurrency)
            .field("default_tts_provider", &self.default_tts_provider)
            .field("enable_vision", &self.enable_vision)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field(
                "llm_provider",
                &self.llm_provider.as_ref().map(|_| "<dyn LLMProvider>"),
            )
            .finish()
    }
}

impl LectureConfig {
    /// Create a new builder for `LectureConfig`.
    pub fn builder() -> LectureConfigBuilder {
        LectureConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache").join("narrations")
    }

    /// Retry policy shared by analysis, narration and synthesis.
    pub fn retry_policy(&self) -> crate::pipeline::retry::RetryPolicy {
        crate::pipeline::retry::RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// Builder for [`LectureConfig`].
#[derive(Debug)]
pub struct LectureConfigBuilder {
    config: LectureConfig,
}

impl LectureConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes.max(1024);
        self
    }

    pub fn max_slides(mut self, n: usize) -> Self {
        self.config.max_slides = n.max(1);
        self
    }

    pub fn rate_limit(mut self, max_runs: usize, window: Duration) -> Self {
        self.config.rate_limit_max_runs = max_runs;
        self.config.rate_limit_window = window;
        self
    }

    pub fn max_concurrent_runs_per_client(mut self, n: usize) -> Self {
        self.config.max_concurrent_runs_per_client = n.max(1);
        self
    }

    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.config.trust_forwarded_for = trust;
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn parse_timeout(mut self, t: Duration) -> Self {
        self.config.parse_timeout = t;
        self
    }

    pub fn analysis_timeout(mut self, t: Duration) -> Self {
        self.config.analysis_timeout = t;
        self
    }

    pub fn narration_timeout(mut self, t: Duration) -> Self {
        self.config.narration_timeout = t;
        self
    }

    pub fn synthesis_timeout(mut self, t: Duration) -> Self {
        self.config.synthesis_timeout = t;
        self
    }

    pub fn tts_concurrency(mut self, n: usize) -> Self {
        self.config.tts_concurrency = n.clamp(1, 32);
        self
    }

    pub fn words_per_minute(mut self, wpm: u32) -> Self {
        self.config.words_per_minute = wpm.clamp(60, 400);
        self
    }

    pub fn default_tts_provider(mut self, name: impl Into<String>) -> Self {
        self.config.default_tts_provider = name.into();
        self
    }

    pub fn enable_vision(mut self, v: bool) -> Self {
        self.config.enable_vision = v;
        self
    }

    pub fn redact_terms(mut self, terms: Vec<String>) -> Self {
        self.config.redact_terms = terms;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn llm_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.llm_provider = Some(provider);
        self
    }

    pub fn analysis_temperature(mut self, t: f32) -> Self {
        self.config.analysis_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn narration_temperature(mut self, t: f32) -> Self {
        self.config.narration_temperature = t.clamp(0.0, 2.0);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<LectureConfig, LectureError> {
        let c = &self.config;
        if c.rate_limit_max_runs == 0 {
            return Err(LectureError::InvalidConfig(
                "rate limit must allow at least one run per window".into(),
            ));
        }
        if c.rate_limit_window.is_zero() {
            return Err(LectureError::InvalidConfig(
                "rate limit window must be non-zero".into(),
            ));
        }
        if c.session_ttl.is_zero() {
            return Err(LectureError::InvalidConfig(
                "session TTL must be non-zero".into(),
            ));
        }
        if c.default_tts_provider.trim().is_empty() {
            return Err(LectureError::InvalidConfig(
                "default TTS provider must be named".into(),
            ));
        }
        for (name, t) in [
            ("parse", c.parse_timeout),
            ("analysis", c.analysis_timeout),
            ("narration", c.narration_timeout),
            ("synthesis", c.synthesis_timeout),
        ] {
            if t.is_zero() {
                return Err(LectureError::InvalidConfig(format!(
                    "{name} timeout must be non-zero"
                )));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = LectureConfig::default();
        assert_eq!(c.max_slides, 150);
        assert_eq!(c.max_file_size, 50 * 1024 * 1024);
        assert_eq!(c.rate_limit_max_runs, 5);
        assert_eq!(c.rate_limit_window, Duration::from_secs(86_400));
        assert_eq!(c.words_per_minute, 150);
        assert!(!c.trust_forwarded_for);
        assert_eq!(c.sessions_dir(), PathBuf::from("data/sessions"));
        assert_eq!(c.cache_dir(), PathBuf::from("data/cache/narrations"));
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = LectureConfig::builder()
            .tts_concurrency(0)
            .max_slides(0)
            .words_per_minute(5)
            .narration_temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.tts_concurrency, 1);
        assert_eq!(c.max_slides, 1);
        assert_eq!(c.words_per_minute, 60);
        assert_eq!(c.narration_temperature, 2.0);
    }

    #[test]
    fn builder_rejects_zero_timeouts() {
        let err = LectureConfig::builder()
            .narration_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("narration timeout"));
    }

    #[test]
    fn builder_rejects_zero_rate_limit() {
        assert!(LectureConfig::builder()
            .rate_limit(0, Duration::from_secs(60))
            .build()
            .is_err());
    }

    #[test]
    fn debug_hides_provider_internals() {
        let dbg = format!("{:?}", LectureConfig::default());
        assert!(dbg.contains("LectureConfig"));
        assert!(dbg.contains("max_slides"));
    }
}
