//! Local neural TTS through the `piper` command-line tool.
//!
//! Piper reads text on stdin and writes a WAV file. It reports no timing
//! marks, so sentence timings are spread over the real WAV duration (read
//! with `hound`) in proportion to word count.
//!
//! Voice models are `<voice>.onnx` files (plus their `.onnx.json` config) in
//! the model directory; the voice name is the file stem.

use super::{estimate_sentence_timings, SynthesizedAudio, TtsProvider};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_VOICE: &str = "en_US-amy-medium";

pub struct PiperTts {
    binary: PathBuf,
    model_dir: PathBuf,
    default_voice: String,
}

impl PiperTts {
    pub fn new(binary: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model_dir: model_dir.into(),
            default_voice: DEFAULT_VOICE.to_string(),
        }
    }

    pub fn with_default_voice(mut self, voice: impl Into<String>) -> Self {
        self.default_voice = voice.into();
        self
    }

    fn model_path(&self, voice: &str) -> PathBuf {
        self.model_dir.join(format!("{voice}.onnx"))
    }
}

#[async_trait]
impl TtsProvider for PiperTts {
    fn name(&self) -> &str {
        "piper"
    }

    fn default_voice(&self) -> &str {
        &self.default_voice
    }

    fn voices(&self) -> Vec<String> {
        let mut voices: Vec<String> = std::fs::read_dir(&self.model_dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
                    .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        voices.sort();
        voices
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        out_stem: &Path,
    ) -> Result<SynthesizedAudio, ProviderError> {
        let model = self.model_path(voice);
        if !model.exists() {
            return Err(ProviderError::Permanent(format!(
                "piper voice model not found: {}",
                model.display()
            )));
        }
        let out = out_stem.with_extension("wav");

        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&model)
            .arg("--output_file")
            .arg(&out)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProviderError::Permanent(format!(
                    "could not start '{}': {e}",
                    self.binary.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| ProviderError::Transient(format!("writing to piper: {e}")))?;
            // Dropping stdin closes the pipe so piper starts synthesising.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProviderError::Transient(format!("waiting for piper: {e}")))?;
        if !output.status.success() {
            return Err(ProviderError::Transient(format!(
                "piper exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let duration = wav_duration_secs(&out)?;
        debug!("piper: {} → {:.1}s", out.display(), duration);

        Ok(SynthesizedAudio {
            path: out,
            mime_type: "audio/wav".to_string(),
            duration_secs: Some(duration),
            timing: estimate_sentence_timings(text, duration),
        })
    }
}

/// Length of a WAV file in seconds.
pub fn wav_duration_secs(path: &Path) -> Result<f64, ProviderError> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| ProviderError::Malformed(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(ProviderError::Malformed(format!(
            "{}: zero sample rate",
            path.display()
        )));
    }
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_silence(path: &Path, secs: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(16_000 * secs) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn reads_wav_duration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.wav");
        write_silence(&path, 2);
        assert!((wav_duration_secs(&path).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn voices_are_model_stems() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("en_US-ryan-medium.onnx"), b"").unwrap();
        std::fs::write(dir.path().join("en_US-ryan-medium.onnx.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("en_US-amy-medium.onnx"), b"").unwrap();
        let tts = PiperTts::new("piper", dir.path());
        assert_eq!(tts.voices(), vec!["en_US-amy-medium", "en_US-ryan-medium"]);
    }

    #[tokio::test]
    async fn missing_model_is_permanent() {
        let dir = TempDir::new().unwrap();
        let tts = PiperTts::new("piper", dir.path());
        let err = tts
            .synthesize("Hello.", "nope", &dir.path().join("slide_000"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
