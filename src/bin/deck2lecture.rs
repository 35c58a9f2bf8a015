//! Server binary for deck2lecture.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `LectureConfig`, wires the providers, and serves the HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use deck2lecture::providers::llm::LlmAiProvider;
use deck2lecture::providers::openai_tts::OpenAiTts;
use deck2lecture::providers::piper::{PiperTts, DEFAULT_VOICE};
use deck2lecture::{
    DefaultDeckParser, LectureConfig, LectureProgressCallback, Orchestrator, Phase, SlideError,
    TtsRegistry,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── Progress logging ─────────────────────────────────────────────────────────

/// Logs phase changes and slide warnings for every session.
struct LogProgressCallback;

impl LectureProgressCallback for LogProgressCallback {
    fn on_phase(&self, session_id: &str, phase: Phase, message: &str) {
        info!(session = %session_id, "{}: {}", phase, message);
    }

    fn on_warning(&self, session_id: &str, warning: &SlideError) {
        warn!(session = %session_id, "{}", warning);
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on localhost:8080 with piper voices in ./voices
  deck2lecture --piper-models ./voices

  # Use Anthropic for narration and keep data elsewhere
  deck2lecture --provider anthropic --model claude-sonnet-4-20250514 --data-dir /var/lib/deck2lecture

  # Upload a deck
  curl -F file=@lecture.pdf -F enable_vision=true http://localhost:8080/api/v1/upload

ENVIRONMENT:
  OPENAI_API_KEY          enables the "openai" TTS provider and the default LLM
  EDGEQUAKE_PROVIDER      LLM provider (openai, anthropic, gemini, ollama, azure)
  EDGEQUAKE_MODEL         LLM model id
  PDFIUM_LIB_PATH         directory containing libpdfium
  RUST_LOG                log filter (default: deck2lecture=info)
"#;

/// Serve narrated lectures generated from PDF and PPTX slide decks.
#[derive(Parser, Debug)]
#[command(
    name = "deck2lecture",
    version,
    about = "Serve narrated lectures generated from PDF and PPTX slide decks",
    long_about = "Upload a PDF or PPTX deck and get back a narrated lecture: an LLM plans the whole \
deck, narrates each slide in order, and a TTS engine voices it. Sessions are persisted under the \
data directory and served over an HTTP API.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "DECK2LECTURE_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Directory for sessions and the narration cache.
    #[arg(long, env = "DECK2LECTURE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Largest accepted upload in megabytes.
    #[arg(long, env = "DECK2LECTURE_MAX_FILE_MB", default_value_t = 50)]
    max_file_mb: u64,

    /// Largest accepted deck in slides.
    #[arg(long, env = "DECK2LECTURE_MAX_SLIDES", default_value_t = 150)]
    max_slides: usize,

    /// Runs a client may start per 24 hours.
    #[arg(long, env = "DECK2LECTURE_RATE_LIMIT", default_value_t = 5)]
    rate_limit: usize,

    /// Runs a client may have in flight at once.
    #[arg(long, env = "DECK2LECTURE_MAX_CONCURRENT_RUNS", default_value_t = 2)]
    max_concurrent_runs: usize,

    /// Rate-limit by the first X-Forwarded-For hop. Only behind a proxy that sets it.
    #[arg(long, env = "DECK2LECTURE_TRUST_FORWARDED_FOR")]
    trust_forwarded_for: bool,

    /// Hours a session stays available.
    #[arg(long, env = "DECK2LECTURE_SESSION_TTL_HOURS", default_value_t = 48)]
    session_ttl_hours: u64,

    /// Retries after the first attempt for each AI and TTS call.
    #[arg(long, env = "DECK2LECTURE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Concurrent TTS calls per session.
    #[arg(long, env = "DECK2LECTURE_TTS_CONCURRENCY", default_value_t = 4)]
    tts_concurrency: usize,

    /// Speaking rate used for duration estimates.
    #[arg(long, env = "DECK2LECTURE_WPM", default_value_t = 150)]
    words_per_minute: u32,

    /// TTS provider used when the upload does not name one.
    #[arg(long, env = "DECK2LECTURE_TTS_PROVIDER", default_value = "piper")]
    tts_provider: String,

    /// Run the vision pass by default.
    #[arg(long, env = "DECK2LECTURE_ENABLE_VISION")]
    enable_vision: bool,

    /// Extra terms scrubbed from narration (comma separated).
    #[arg(long, env = "DECK2LECTURE_REDACT", value_delimiter = ',')]
    redact: Vec<String>,

    /// Path to the piper executable.
    #[arg(long, env = "PIPER_BINARY", default_value = "piper")]
    piper_binary: PathBuf,

    /// Directory holding piper `<voice>.onnx` models.
    #[arg(long, env = "PIPER_MODELS", default_value = "voices")]
    piper_models: PathBuf,

    /// Default piper voice.
    #[arg(long, env = "PIPER_VOICE", default_value = DEFAULT_VOICE)]
    piper_voice: String,

    /// Seconds between expired-session sweeps.
    #[arg(long, env = "DECK2LECTURE_SWEEP_SECS", default_value_t = 600)]
    sweep_interval_secs: u64,

    /// Enable debug logging.
    #[arg(short, long, env = "DECK2LECTURE_VERBOSE")]
    verbose: bool,
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "deck2lecture=debug,tower_http=debug"
    } else {
        "deck2lecture=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let mut builder = LectureConfig::builder()
        .data_dir(&cli.data_dir)
        .max_file_size(cli.max_file_mb.saturating_mul(1024 * 1024))
        .max_slides(cli.max_slides)
        .rate_limit(cli.rate_limit, Duration::from_secs(24 * 60 * 60))
        .max_concurrent_runs_per_client(cli.max_concurrent_runs)
        .trust_forwarded_for(cli.trust_forwarded_for)
        .session_ttl(Duration::from_secs(cli.session_ttl_hours.saturating_mul(3600)))
        .max_retries(cli.max_retries)
        .tts_concurrency(cli.tts_concurrency)
        .words_per_minute(cli.words_per_minute)
        .default_tts_provider(&cli.tts_provider)
        .enable_vision(cli.enable_vision)
        .redact_terms(
            cli.redact
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        );
    if let Some(model) = &cli.model {
        builder = builder.model(model);
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider);
    }
    let config = builder.build().context("Invalid configuration")?;
    info!("{:?}", config);

    // ── Providers ────────────────────────────────────────────────────────
    let ai = LlmAiProvider::from_config(&config).context("Failed to set up the LLM provider")?;

    let mut tts = TtsRegistry::new().with(Arc::new(
        PiperTts::new(&cli.piper_binary, &cli.piper_models).with_default_voice(&cli.piper_voice),
    ));
    if let Some(openai) = OpenAiTts::from_env(config.words_per_minute) {
        tts.register(Arc::new(openai));
    }
    for provider in tts.describe() {
        info!(
            "TTS provider '{}' ({} voice(s), default {})",
            provider.name,
            provider.voices.len(),
            provider.default_voice
        );
    }
    if tts.get(&config.default_tts_provider).is_none() {
        anyhow::bail!(
            "Default TTS provider '{}' is not available",
            config.default_tts_provider
        );
    }

    // ── Orchestrator ─────────────────────────────────────────────────────
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(DefaultDeckParser::default()),
        Arc::new(ai),
        tts,
    )
    .with_progress_callback(Arc::new(LogProgressCallback));
    orchestrator
        .restore()
        .await
        .context("Failed to restore persisted sessions")?;
    let _sweeper = orchestrator.spawn_sweeper(Duration::from_secs(cli.sweep_interval_secs.max(10)));

    // ── Serve ────────────────────────────────────────────────────────────
    let app = deck2lecture::api::router(orchestrator);
    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("Listening on http://{}/api/v1", cli.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    })
    .await
    .context("Server error")?;
    Ok(())
}
