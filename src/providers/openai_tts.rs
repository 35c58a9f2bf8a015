//! Hosted TTS through an OpenAI-compatible `/v1/audio/speech` endpoint.
//!
//! The endpoint returns MP3 bytes and no timing data. Duration and sentence
//! timings are estimated from the configured speaking rate.

use super::{estimate_duration_secs, estimate_sentence_timings, SynthesizedAudio, TtsProvider};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "tts-1";

const VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

pub struct OpenAiTts {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    words_per_minute: u32,
}

impl OpenAiTts {
    pub fn new(api_key: impl Into<String>, words_per_minute: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            words_per_minute,
        }
    }

    /// Provider from `OPENAI_API_KEY`, if set and non-empty.
    pub fn from_env(words_per_minute: u32) -> Option<Self> {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(|k| Self::new(k, words_per_minute))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("speech endpoint returned {status}: {}", body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(detail)
    } else {
        ProviderError::Permanent(detail)
    }
}

#[async_trait]
impl TtsProvider for OpenAiTts {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_voice(&self) -> &str {
        "alloy"
    }

    fn voices(&self) -> Vec<String> {
        VOICES.iter().map(|v| v.to_string()).collect()
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        out_stem: &Path,
    ) -> Result<SynthesizedAudio, ProviderError> {
        let url = format!("{}/v1/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "mp3",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ProviderError::Malformed("empty audio body".into()));
        }

        let out = out_stem.with_extension("mp3");
        tokio::fs::write(&out, &bytes)
            .await
            .map_err(|e| ProviderError::Permanent(format!("{}: {e}", out.display())))?;
        debug!("openai tts: {} bytes → {}", bytes.len(), out.display());

        let duration = estimate_duration_secs(text, self.words_per_minute);
        Ok(SynthesizedAudio {
            path: out,
            mime_type: "audio/mpeg".to_string(),
            duration_secs: Some(duration),
            timing: estimate_sentence_timings(text, duration),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "voice").is_retryable());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let tts = OpenAiTts::new("k", 150).with_base_url("http://localhost:8880/");
        assert_eq!(tts.base_url, "http://localhost:8880");
    }

    #[test]
    fn advertises_builtin_voices() {
        let tts = OpenAiTts::new("k", 150);
        assert!(tts.voices().contains(&tts.default_voice().to_string()));
    }
}
