//! Global context pass: one holistic look at the deck before any narration.
//!
//! Narrating slide 14 well requires knowing the lecture is about linear
//! programming, that slide 14 sits in the "Duality" section, and that it
//! leans on the definition from slide 6. None of that is visible from slide
//! 14 alone, so the whole deck is analysed once up front and the result (a
//! [`GlobalContextPlan`]) is handed to every narration call.
//!
//! The structural call is required: if it fails after all retries the run
//! fails. The optional vision call over diagram-heavy slides only adds
//! diagram descriptions; its failure leaves a [`SlideError::VisionMissing`]
//! warning on every slide it covered and the plan is built without them.

use super::retry::{call_with_retry, RetryPolicy};
use crate::error::{LectureError, SlideError};
use crate::plan::{GlobalContextPlan, RawDiagram};
use crate::providers::AiProvider;
use crate::slide::{SlideRecord, SlideType};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A built plan plus one warning per slide the failed vision pass covered.
#[derive(Debug, Clone)]
pub struct ContextOutcome {
    pub plan: GlobalContextPlan,
    pub warnings: Vec<SlideError>,
}

pub struct GlobalContextBuilder {
    ai: Arc<dyn AiProvider>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl GlobalContextBuilder {
    pub fn new(ai: Arc<dyn AiProvider>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            ai,
            policy,
            timeout,
        }
    }

    /// Analyse `slides` into a plan.
    ///
    /// `fallback_title` (usually the upload's file stem) names the lecture
    /// when the provider does not infer a title.
    pub async fn analyze(
        &self,
        slides: &[SlideRecord],
        enable_vision: bool,
        fallback_title: &str,
    ) -> Result<ContextOutcome, LectureError> {
        let structure = call_with_retry(&self.policy, self.timeout, "structural analysis", || {
            self.ai.analyze_structure(slides)
        })
        .await
        .map_err(|f| LectureError::Analysis {
            attempts: f.attempts,
            detail: f.last.to_string(),
        })?;
        let mut tokens = structure.tokens;

        let mut diagrams: Vec<RawDiagram> = Vec::new();
        let mut warnings = Vec::new();
        if enable_vision {
            let candidates: Vec<SlideRecord> = slides
                .iter()
                .filter(|s| s.slide_type == SlideType::DiagramHeavy)
                .filter(|s| s.images.iter().any(|i| i.data.is_some()))
                .cloned()
                .collect();
            if candidates.is_empty() {
                info!("Vision pass skipped: no diagram-heavy slides with image data");
            } else {
                match call_with_retry(&self.policy, self.timeout, "vision analysis", || {
                    self.ai.analyze_diagrams(&candidates)
                })
                .await
                {
                    Ok(answer) => {
                        tokens += answer.tokens;
                        diagrams = answer.value;
                    }
                    Err(f) => {
                        warn!(
                            "Vision analysis failed after {} attempt(s), continuing without diagrams: {}",
                            f.attempts, f.last
                        );
                        let detail = f.last.to_string();
                        warnings = candidates
                            .iter()
                            .map(|s| SlideError::VisionMissing {
                                slide: s.index,
                                detail: detail.clone(),
                            })
                            .collect();
                    }
                }
            }
        }

        let plan = GlobalContextPlan::from_analysis(
            slides.len(),
            &structure.value,
            &diagrams,
            tokens,
            fallback_title,
        );
        info!(
            "Plan: '{}', {} sections, {} terms, {} cross-referenced slides, {} diagrams, {} tokens",
            plan.lecture_title,
            plan.sections.len(),
            plan.terminology.len(),
            plan.cross_references.len(),
            plan.key_diagrams.len(),
            plan.total_tokens
        );
        Ok(ContextOutcome { plan, warnings })
    }
}
