//! Prompts for deck analysis and narration.
//!
//! Every prompt lives here so wording changes never touch retry or parsing
//! logic, and so tests can assert on prompt content without a live model.

use crate::plan::GlobalContextPlan;
use crate::slide::SlideRecord;
use std::fmt::Write as _;

/// System prompt for the structural analysis pass.
pub const STRUCTURE_SYSTEM_PROMPT: &str = r#"You are analyzing a lecture presentation to understand its pedagogical structure.

Return your analysis as a single JSON object with exactly these keys:

{
  "lecture_title": "Inferred title of the lecture",
  "sections": [
    {"title": "Section name", "start_slide": 0, "end_slide": 10, "summary": "Brief summary", "key_concepts": ["concept"]}
  ],
  "topic_progression": ["Topic 1", "Topic 2"],
  "learning_objectives": ["What students should learn"],
  "terminology": {"term": "definition"},
  "prerequisites": ["Required prior knowledge"],
  "cross_references": {"5": [3, 1]},
  "instructional_style": "theoretical|practical|mixed",
  "audience_level": "beginner|intermediate|advanced"
}

Rules:
1. Slide numbers in the JSON are the 0-based indices shown as [SLIDE n].
2. cross_references maps a slide to earlier or later slides whose material it relies on. Use integers only.
3. Extract terminology primarily from definitions, theorems and corollaries.
4. Identify sections from section headers and topic changes.
5. Return ONLY the JSON object, no commentary and no code fences."#;

/// System prompt for the optional vision pass.
pub const VISION_SYSTEM_PROMPT: &str = r#"You are analyzing diagrams from a lecture presentation.

The legend lists each image's id and the 0-based slide index it belongs to. For every image that carries teaching content, describe what it depicts and why it is on the slide.

Return a single JSON object:

{"key_diagrams": [{"slide": 3, "image_id": "slide3_img0", "description": "What the diagram shows", "purpose": "Its pedagogical purpose"}]}

Skip decorative images and logos. Return ONLY the JSON object."#;

/// System prompt for per-slide narration.
pub const NARRATION_SYSTEM_PROMPT: &str = r#"You are an expert lecturer narrating a slide presentation live.

Requirements:
1. Explain concepts, do not just read the slide.
2. Reference prior material only when it genuinely helps; do not open every slide with a recap.
3. Set up the next slide only when it is pedagogically relevant.
4. Stay faithful to the slide; do not improvise unrelated material.
5. Do not repeat what the previous slide already covered thoroughly.
6. Use conversational academic language.
7. If the slide builds on the previous one, talk only about what is new.

Privacy and speech compatibility:
8. Never mention instructor, professor or teaching assistant names.
9. Never mention specific universities, institutions or course codes.
10. Write all mathematics in spoken form: "c transpose x", "less than or equal to", "a over b", "x sub i". Never output LaTeX, dollar signs or backslashes.
11. Output plain prose only: no markdown, no bullet lists, no headings.

Length: 150-250 words. Output the narration text only, no preamble."#;

/// Render the whole deck as text for the structural pass.
pub fn deck_text(slides: &[SlideRecord]) -> String {
    let mut out = String::new();
    for slide in slides {
        let _ = writeln!(out, "\n[SLIDE {}]", slide.index);
        if let Some(title) = &slide.title {
            let _ = writeln!(out, "Title: {title}");
        }
        for c in &slide.constructs {
            let label = c.label.as_deref().map(|l| format!(" {l}")).unwrap_or_default();
            let _ = writeln!(out, "[{}{}] {}", c.kind.keyword().to_uppercase(), label, c.body);
        }
        if !slide.bullets.is_empty() {
            for b in &slide.bullets {
                let _ = writeln!(out, "  - {b}");
            }
        } else if !slide.body.is_empty() {
            let _ = writeln!(out, "{}", slide.body);
        }
        if !slide.images.is_empty() {
            let _ = writeln!(out, "[Contains {} image(s)]", slide.images.len());
        }
    }
    out
}

/// User message for the structural pass.
pub fn structure_request(slides: &[SlideRecord]) -> String {
    format!(
        "The deck has {} slides.\n{}",
        slides.len(),
        deck_text(slides)
    )
}

/// User message for narrating one slide.
pub fn narration_request(slide: &SlideRecord, plan: &GlobalContextPlan, prior_summary: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "GLOBAL LECTURE CONTEXT");
    let _ = writeln!(out, "- Title: {}", plan.lecture_title);
    if !plan.learning_objectives.is_empty() {
        let objectives: Vec<&str> = plan
            .learning_objectives
            .iter()
            .take(3)
            .map(String::as_str)
            .collect();
        let _ = writeln!(out, "- Learning objectives: {}", objectives.join("; "));
    }
    if let Some(section) = plan.section_for(slide.index) {
        let _ = writeln!(out, "- Current section: {}", section.title);
    }
    let _ = writeln!(out, "- Audience level: {}", plan.audience_level);
    let _ = writeln!(out, "- Style: {}", plan.instructional_style);
    let _ = writeln!(
        out,
        "- Position: slide {} of {}",
        slide.index + 1,
        plan.total_slides
    );

    if !prior_summary.is_empty() {
        let _ = writeln!(out, "\nPREVIOUS SLIDE SUMMARY\n{prior_summary}");
    }

    let _ = writeln!(out, "\nCURRENT SLIDE");
    let _ = writeln!(out, "Title: {}", slide.display_title());
    match (&slide.builds_on, &slide.new_content) {
        (Some(prev), Some(new)) => {
            let _ = writeln!(
                out,
                "This slide extends slide {} with the following new content only:\n{}",
                prev + 1,
                new
            );
        }
        _ => {
            let _ = writeln!(out, "{}", slide.body);
        }
    }
    for c in &slide.constructs {
        let label = c.label.as_deref().map(|l| format!(" {l}")).unwrap_or_default();
        let _ = writeln!(out, "[{}{}] {}", c.kind.keyword().to_uppercase(), label, c.body);
    }
    if let Some(diagram) = plan.diagram_for(slide.index) {
        let _ = writeln!(out, "Diagram: {} ({})", diagram.description, diagram.purpose);
    } else if !slide.images.is_empty() {
        let _ = writeln!(out, "Images: {} diagram(s) present", slide.images.len());
    }
    if let Some(notes) = slide.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "Speaker notes: {notes}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StructuralAnalysis;
    use crate::slide::{AcademicConstruct, ConstructKind, SlideType};

    fn slide() -> SlideRecord {
        SlideRecord {
            index: 2,
            slide_type: SlideType::Content,
            title: Some("Extreme Points".into()),
            bullets: vec!["Vertices of the polyhedron".into()],
            body: "Vertices of the polyhedron".into(),
            images: vec![],
            notes: Some("Draw the triangle".into()),
            constructs: vec![AcademicConstruct {
                kind: ConstructKind::Corollary,
                label: Some("3.26".into()),
                title: None,
                body: "A bounded polyhedron has an extreme point.".into(),
            }],
            builds_on: None,
            new_content: None,
        }
    }

    #[test]
    fn deck_text_uses_zero_based_markers() {
        let text = deck_text(&[slide()]);
        assert!(text.contains("[SLIDE 2]"));
        assert!(text.contains("[COROLLARY 3.26]"));
        assert!(text.contains("- Vertices"));
    }

    #[test]
    fn narration_request_includes_prior_summary_only_when_present() {
        let plan = GlobalContextPlan::from_analysis(5, &StructuralAnalysis::default(), &[], 0, "LP");
        let with = narration_request(&slide(), &plan, "We defined polyhedra.");
        assert!(with.contains("PREVIOUS SLIDE SUMMARY"));
        assert!(with.contains("slide 3 of 5"));
        assert!(with.contains("Speaker notes: Draw the triangle"));
        let without = narration_request(&slide(), &plan, "");
        assert!(!without.contains("PREVIOUS SLIDE SUMMARY"));
    }

    #[test]
    fn narration_prompt_forbids_latex_and_names() {
        assert!(NARRATION_SYSTEM_PROMPT.contains("Never output LaTeX"));
        assert!(NARRATION_SYSTEM_PROMPT.contains("instructor"));
    }
}
