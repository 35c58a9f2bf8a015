//! Per-slide narration.
//!
//! Slides are narrated strictly in order. Each call sees the global plan, the
//! slide, and a short summary of what was just said about the previous slide
//! ([`prior_summary`]), which is what lets the narration flow instead of
//! re-introducing the lecture on every slide.
//!
//! The provider returns plain text only. Everything else on a
//! [`NarrationSegment`] is derived here, deterministically:
//!
//! | Field | Source |
//! |-------|--------|
//! | `text` | provider output after [`clean_narration`] |
//! | `referenced_slides` | the plan's cross-references to earlier slides |
//! | `introduced_concepts` | terms and construct titles mentioned here first ([`ConceptTracker`]) |
//! | `next_slide_teaser` | the closing sentence when it points forward |
//! | `estimated_duration_secs` | word count at the configured speaking rate |

use super::postprocess::{clean_narration, has_residual_markup};
use super::retry::{call_with_retry, RetryPolicy};
use crate::error::{LectureError, ProviderError};
use crate::output::NarrationSegment;
use crate::plan::GlobalContextPlan;
use crate::providers::{estimate_duration_secs, split_sentences, AiProvider, NarrationRequest};
use crate::slide::SlideRecord;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SUMMARY_MAX_CHARS: usize = 200;
const TEASER_CUES: [&str; 3] = ["next", "coming up", "following"];

pub struct NarrationGenerator {
    ai: Arc<dyn AiProvider>,
    policy: RetryPolicy,
    timeout: Duration,
    words_per_minute: u32,
    redact_terms: Vec<String>,
}

impl NarrationGenerator {
    pub fn new(
        ai: Arc<dyn AiProvider>,
        policy: RetryPolicy,
        timeout: Duration,
        words_per_minute: u32,
        redact_terms: Vec<String>,
    ) -> Self {
        Self {
            ai,
            policy,
            timeout,
            words_per_minute,
            redact_terms,
        }
    }

    /// Narrate one slide. Retries with identical inputs, then fails the run.
    pub async fn generate(
        &self,
        slide: &SlideRecord,
        plan: &GlobalContextPlan,
        prior_summary: &str,
        concepts: &mut ConceptTracker,
    ) -> Result<NarrationSegment, LectureError> {
        let request = NarrationRequest {
            slide,
            plan,
            prior_summary,
        };
        let label = format!("narration slide {}", slide.index);

        let (text, tokens) = call_with_retry(&self.policy, self.timeout, &label, || async {
            let draft = self.ai.generate_narration(&request).await?;
            let text = clean_narration(&draft.text, &self.redact_terms);
            if text.is_empty() {
                return Err(ProviderError::Malformed("narration is empty after cleanup".into()));
            }
            if has_residual_markup(&text) {
                return Err(ProviderError::Malformed(
                    "narration still contains markup after cleanup".into(),
                ));
            }
            Ok((text, draft.tokens))
        })
        .await
        .map_err(|f| LectureError::Generation {
            slide: slide.index,
            attempts: f.attempts,
            detail: f.last.to_string(),
        })?;

        let introduced_concepts = concepts.introduce(&candidate_concepts(slide, plan, &text));
        let segment = NarrationSegment {
            slide_index: slide.index,
            estimated_duration_secs: estimate_duration_secs(&text, self.words_per_minute),
            referenced_slides: plan.earlier_references(slide.index),
            introduced_concepts,
            next_slide_teaser: teaser(&text),
            tokens_used: tokens,
            generated_at: Utc::now(),
            text,
        };
        debug!(
            "Slide {}: {} words, {:.0}s, {} new concept(s)",
            slide.index,
            segment.word_count(),
            segment.estimated_duration_secs,
            segment.introduced_concepts.len()
        );
        Ok(segment)
    }
}

// ── Derived fields ───────────────────────────────────────────────────────────

/// Concepts already introduced earlier in the lecture.
#[derive(Debug, Clone, Default)]
pub struct ConceptTracker {
    seen: HashSet<String>,
}

impl ConceptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `candidates`, returning those not seen before (in input order).
    pub fn introduce(&mut self, candidates: &[String]) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| self.seen.insert(c.to_lowercase()))
            .cloned()
            .collect()
    }
}

/// Construct titles on the slide, then plan terms mentioned in the slide or narration.
fn candidate_concepts(slide: &SlideRecord, plan: &GlobalContextPlan, narration: &str) -> Vec<String> {
    let haystack = format!("{} {} {}", slide.display_title(), slide.body, narration).to_lowercase();
    let mut out: Vec<String> = slide
        .constructs
        .iter()
        .filter_map(|c| c.title.clone())
        .collect();
    out.extend(
        plan.terminology
            .keys()
            .filter(|term| !term.trim().is_empty() && haystack.contains(&term.to_lowercase()))
            .cloned(),
    );
    out
}

/// The closing sentence, if it sets up what comes next.
pub fn teaser(text: &str) -> Option<String> {
    let last = split_sentences(text).pop()?;
    let lower = last.to_lowercase();
    TEASER_CUES
        .iter()
        .any(|cue| lower.contains(cue))
        .then_some(last)
}

/// Continuity context for the next slide: previous title plus its opening sentences.
pub fn prior_summary(previous_slide: &SlideRecord, previous: &NarrationSegment) -> String {
    let mut summary = format!("{}: ", previous_slide.display_title());
    for sentence in split_sentences(&previous.text) {
        if summary.len() >= SUMMARY_MAX_CHARS {
            break;
        }
        summary.push_str(&sentence);
        summary.push(' ');
    }
    clip_at_word(summary.trim(), SUMMARY_MAX_CHARS)
}

fn clip_at_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    match clipped.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}...", clipped[..idx].trim_end()),
        _ => format!("{clipped}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StructuralAnalysis;
    use crate::slide::{AcademicConstruct, ConstructKind, SlideType};

    fn slide(index: usize, title: &str, body: &str) -> SlideRecord {
        SlideRecord {
            index,
            slide_type: SlideType::Content,
            title: Some(title.into()),
            bullets: vec![],
            body: body.into(),
            images: vec![],
            notes: None,
            constructs: vec![],
            builds_on: None,
            new_content: None,
        }
    }

    fn segment(text: &str) -> NarrationSegment {
        NarrationSegment {
            slide_index: 0,
            text: text.into(),
            estimated_duration_secs: 1.0,
            referenced_slides: vec![],
            introduced_concepts: vec![],
            next_slide_teaser: None,
            tokens_used: 0,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn teaser_only_when_last_sentence_points_forward() {
        assert_eq!(
            teaser("Polyhedra are convex. Next, we look at extreme points.").as_deref(),
            Some("Next, we look at extreme points.")
        );
        assert_eq!(teaser("Next we prove it. That is the result."), None);
        assert_eq!(teaser(""), None);
    }

    #[test]
    fn prior_summary_is_title_plus_leading_sentences_clipped() {
        let prev = slide(3, "Duality", "");
        let text = "Every LP has a dual. ".repeat(30);
        let summary = prior_summary(&prev, &segment(&text));
        assert!(summary.starts_with("Duality: Every LP has a dual."));
        assert!(summary.chars().count() <= SUMMARY_MAX_CHARS + 3);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn short_prior_summary_is_not_clipped() {
        let summary = prior_summary(&slide(0, "Intro", ""), &segment("Welcome. Today is LP."));
        assert_eq!(summary, "Intro: Welcome. Today is LP.");
    }

    #[test]
    fn concepts_are_introduced_once() {
        let mut raw = StructuralAnalysis::default();
        raw.terminology = serde_json::json!({"polyhedron": "an intersection of half-spaces"});
        let plan = GlobalContextPlan::from_analysis(3, &raw, &[], 0, "LP");

        let mut first = slide(1, "Polyhedra", "A polyhedron is ...");
        first.constructs.push(AcademicConstruct {
            kind: ConstructKind::Definition,
            label: None,
            title: Some("Extreme point".into()),
            body: "A point that is not a convex combination.".into(),
        });
        let mut tracker = ConceptTracker::new();
        let got = tracker.introduce(&candidate_concepts(&first, &plan, "We meet the polyhedron."));
        assert_eq!(got, vec!["Extreme point", "polyhedron"]);

        let second = slide(2, "More", "Polyhedron again");
        let got = tracker.introduce(&candidate_concepts(&second, &plan, "Same polyhedron."));
        assert!(got.is_empty());
    }
}
