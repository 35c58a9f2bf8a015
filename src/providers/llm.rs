//! [`AiProvider`] on top of any `edgequake-llm` chat provider.
//!
//! All prompt wording lives in [`crate::prompts`]; this module only builds
//! the message lists, calls the provider, and turns the answer into typed
//! values. Retry and timeout are the caller's job ([`crate::pipeline::retry`]).
//!
//! ## Error classification
//!
//! `edgequake-llm` reports failures as display strings. Authentication and
//! request-shape errors are mapped to [`ProviderError::Permanent`] so the
//! retry loop gives up at once; everything else (rate limits, 5xx, network)
//! is [`ProviderError::Transient`].

use super::{AiProvider, Analysis, NarrationDraft, NarrationRequest};
use crate::config::LectureConfig;
use crate::error::{LectureError, ProviderError};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::postprocess::parse_json;
use crate::plan::{RawDiagram, StructuralAnalysis};
use crate::prompts::{
    narration_request, structure_request, NARRATION_SYSTEM_PROMPT, STRUCTURE_SYSTEM_PROMPT,
    VISION_SYSTEM_PROMPT,
};
use crate::slide::SlideRecord;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Most images sent in a single vision request.
const MAX_VISION_IMAGES: usize = 12;

/// Default model when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-mini";

pub struct LlmAiProvider {
    name: String,
    llm: Arc<dyn LLMProvider>,
    analysis_options: CompletionOptions,
    narration_options: CompletionOptions,
}

impl LlmAiProvider {
    pub fn new(llm: Arc<dyn LLMProvider>, config: &LectureConfig) -> Self {
        Self {
            name: config
                .provider_name
                .clone()
                .unwrap_or_else(|| "llm".to_string()),
            llm,
            analysis_options: CompletionOptions {
                temperature: Some(config.analysis_temperature),
                max_tokens: Some(config.analysis_max_tokens),
                ..Default::default()
            },
            narration_options: CompletionOptions {
                temperature: Some(config.narration_temperature),
                max_tokens: Some(config.narration_max_tokens),
                ..Default::default()
            },
        }
    }

    /// Resolve the LLM from `config` and wrap it.
    pub fn from_config(config: &LectureConfig) -> Result<Self, LectureError> {
        let llm = resolve_provider(config)?;
        Ok(Self::new(llm, config))
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<(String, u64), ProviderError> {
        let response = self
            .llm
            .chat(messages, Some(options))
            .await
            .map_err(|e| classify(&e.to_string()))?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name,
            response.prompt_tokens,
            response.completion_tokens
        );
        let tokens = response.prompt_tokens as u64 + response.completion_tokens as u64;
        Ok((response.content, tokens))
    }
}

#[derive(Deserialize)]
struct DiagramAnswer {
    #[serde(default)]
    key_diagrams: Vec<RawDiagram>,
}

#[async_trait]
impl AiProvider for LlmAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze_structure(
        &self,
        slides: &[SlideRecord],
    ) -> Result<Analysis<StructuralAnalysis>, ProviderError> {
        let messages = vec![
            ChatMessage::system(STRUCTURE_SYSTEM_PROMPT),
            ChatMessage::user(structure_request(slides)),
        ];
        let (content, tokens) = self.chat(&messages, &self.analysis_options).await?;
        let value: StructuralAnalysis = parse_json(&content).map_err(ProviderError::Malformed)?;
        Ok(Analysis { value, tokens })
    }

    async fn analyze_diagrams(
        &self,
        slides: &[SlideRecord],
    ) -> Result<Analysis<Vec<RawDiagram>>, ProviderError> {
        let mut images = Vec::new();
        let mut legend = String::from("Images in order, with the slide each belongs to:\n");
        'outer: for slide in slides {
            for image in &slide.images {
                if images.len() >= MAX_VISION_IMAGES {
                    break 'outer;
                }
                if let Some(data) = to_image_data(image) {
                    let _ = writeln!(
                        legend,
                        "- image {} (id {}) → slide {} ({})",
                        images.len() + 1,
                        image.id,
                        slide.index,
                        slide.display_title()
                    );
                    images.push(data);
                }
            }
        }
        if images.is_empty() {
            return Ok(Analysis {
                value: Vec::new(),
                tokens: 0,
            });
        }

        let messages = vec![
            ChatMessage::system(VISION_SYSTEM_PROMPT),
            ChatMessage::user_with_images(legend, images),
        ];
        let (content, tokens) = self.chat(&messages, &self.analysis_options).await?;
        let answer: DiagramAnswer = parse_json(&content).map_err(ProviderError::Malformed)?;
        Ok(Analysis {
            value: answer.key_diagrams,
            tokens,
        })
    }

    async fn generate_narration(
        &self,
        request: &NarrationRequest<'_>,
    ) -> Result<NarrationDraft, ProviderError> {
        let messages = vec![
            ChatMessage::system(NARRATION_SYSTEM_PROMPT),
            ChatMessage::user(narration_request(
                request.slide,
                request.plan,
                request.prior_summary,
            )),
        ];
        let (text, tokens) = self.chat(&messages, &self.narration_options).await?;
        if text.trim().is_empty() {
            return Err(ProviderError::Malformed("empty narration".into()));
        }
        Ok(NarrationDraft { text, tokens })
    }
}

/// Map a provider error message onto the retry classification.
pub(crate) fn classify(message: &str) -> ProviderError {
    let lower = message.to_ascii_lowercase();
    let permanent = [
        "401",
        "403",
        "unauthorized",
        "forbidden",
        "invalid api key",
        "invalid_api_key",
        "authentication",
        "model_not_found",
        "does not exist",
        "context_length_exceeded",
    ];
    if permanent.iter().any(|p| lower.contains(p)) {
        ProviderError::Permanent(message.to_string())
    } else {
        ProviderError::Transient(message.to_string())
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, LectureError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        LectureError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.llm_provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    checked before auto-detection so the model choice is honoured even when
///    several API keys are present.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &LectureConfig) -> Result<Arc<dyn LLMProvider>, LectureError> {
    if let Some(ref provider) = config.llm_provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| LectureError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
