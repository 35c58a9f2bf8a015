//! Slide text heuristics: turn the raw text of one slide into a [`SlideRecord`].
//!
//! Both container parsers ([`super::pdf`], [`super::pptx`]) produce a
//! [`RawSlide`]: the slide's text in reading order, an optional title the
//! container marked explicitly, its images and its notes. Everything else
//! (title fallback, bullets, slide type, academic constructs, incremental
//! builds) is derived here so the two formats behave identically.
//!
//! ## Construct extraction
//!
//! Lecture decks in mathematical subjects box their definitions, theorems and
//! corollaries. A declaration is a keyword at the **start of a line**,
//! optionally followed by a number (`3.26`), a parenthesised name and a `:` or
//! `.`. The body runs to the next declaration or the end of the slide, so
//! multi-line statements are captured whole.
//!
//! Line-start anchoring already rules out most in-prose mentions ("by
//! Theorem 2 we have"). The rest are caught by two filters on the body:
//! shorter than 10 characters, or opening with a reference verb
//! ("Corollary 2.4 implies that ...").

use crate::slide::{AcademicConstruct, ConstructKind, SlideImage, SlideRecord, SlideType};
use once_cell::sync::Lazy;
use regex::Regex;
use similar::TextDiff;
use std::collections::HashSet;
use tracing::debug;

/// Slide content as extracted from the container, before any heuristics.
#[derive(Debug, Clone, Default)]
pub struct RawSlide {
    pub index: usize,
    /// Text in reading order, one paragraph per line.
    pub text: String,
    /// Title the container marked explicitly (PPTX title placeholder).
    pub title_hint: Option<String>,
    pub images: Vec<SlideImage>,
    pub notes: Option<String>,
}

const MAX_TITLE_CHARS: usize = 100;
const MIN_CONSTRUCT_BODY: usize = 10;
const BUILD_SIMILARITY: f32 = 0.7;

const REFERENCE_VERBS: [&str; 8] = [
    "implies",
    "shows",
    "states",
    "proves",
    "guarantees",
    "ensures",
    "yields",
    "gives",
];

const SECTION_KEYWORDS: [&str; 4] = ["section", "chapter", "part", "overview"];
const CONCLUSION_KEYWORDS: [&str; 5] = ["conclusion", "summary", "recap", "takeaway", "thank you"];

/// Build every slide of a deck and link incremental builds.
pub fn build_deck(raw: Vec<RawSlide>) -> Vec<SlideRecord> {
    let mut slides: Vec<SlideRecord> = raw.into_iter().map(build_slide).collect();
    detect_incremental_builds(&mut slides);
    slides
}

/// Derive title, bullets, type and constructs for a single slide.
pub fn build_slide(raw: RawSlide) -> SlideRecord {
    let title = raw
        .title_hint
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| clip_chars(t, MAX_TITLE_CHARS))
        .or_else(|| extract_title(&raw.text));
    let bullets = extract_bullets(&raw.text);
    let slide_type = infer_slide_type(&raw.text, raw.images.len(), raw.index);
    let constructs = extract_constructs(&raw.text);
    let body = plain_body(&raw.text);

    SlideRecord {
        index: raw.index,
        slide_type,
        title,
        bullets,
        body,
        images: raw.images,
        notes: raw.notes.filter(|n| !n.trim().is_empty()),
        constructs,
        builds_on: None,
        new_content: None,
    }
}

// ── Title ────────────────────────────────────────────────────────────────────

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s+(.+)$").unwrap());

/// First markdown heading, else the first non-empty line, clipped.
pub fn extract_title(text: &str) -> Option<String> {
    if let Some(caps) = RE_HEADING.captures(text) {
        return Some(clip_chars(caps[1].trim(), MAX_TITLE_CHARS));
    }
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| clip_chars(l, MAX_TITLE_CHARS))
}

fn clip_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Bullets ──────────────────────────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+•▪◦–]|\d+[.)])\s+(.+)$").unwrap());

pub fn extract_bullets(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| RE_BULLET.captures(line))
        .map(|caps| caps[1].trim().to_string())
        .filter(|b| !b.is_empty())
        .collect()
}

// ── Slide type ───────────────────────────────────────────────────────────────

pub fn infer_slide_type(text: &str, image_count: usize, index: usize) -> SlideType {
    if index == 0 {
        return SlideType::Title;
    }
    if image_count >= 2 {
        return SlideType::DiagramHeavy;
    }
    let lower = text.to_lowercase();
    let line_count = text.trim().lines().count();
    if SECTION_KEYWORDS.iter().any(|k| lower.contains(k)) && line_count <= 3 {
        return SlideType::SectionHeader;
    }
    if CONCLUSION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return SlideType::Conclusion;
    }
    SlideType::Content
}

// ── Body ─────────────────────────────────────────────────────────────────────

static RE_MD_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+([^*]+)\*+").unwrap());
static RE_MD_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static RE_BULLET_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*+•▪◦–]|\d+[.)])\s+").unwrap());
static RE_HEADING_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s+").unwrap());
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn plain_body(text: &str) -> String {
    let s = RE_HEADING_MARKER.replace_all(text, "");
    let s = RE_MD_EMPHASIS.replace_all(&s, "$1");
    let s = RE_MD_LINK.replace_all(&s, "$1");
    let s = RE_BULLET_MARKER.replace_all(&s, "");
    let s = RE_BLANK_RUN.replace_all(&s, "\n\n");
    s.trim().to_string()
}

// ── Academic constructs ──────────────────────────────────────────────────────

static RE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    let keywords: Vec<String> = ConstructKind::ALL
        .iter()
        .flat_map(|k| [k.keyword().to_string(), k.keyword().to_uppercase()])
        .collect();
    Regex::new(&format!(
        r"(?m)^[ \t]*(?:#+[ \t]*)?(?:\*\*)?({})\b(?:\*\*)?[ \t]*(\d+(?:\.\d+)*)?[ \t]*(?:\(([^)\n]*)\))?[ \t]*[:.]?",
        keywords.join("|")
    ))
    .unwrap()
});
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Find construct declarations and capture each body up to the next declaration.
pub fn extract_constructs(text: &str) -> Vec<AcademicConstruct> {
    let matches: Vec<_> = RE_DECLARATION.captures_iter(text).collect();
    let mut out = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(kw)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let Some(kind) = ConstructKind::from_keyword(kw.as_str()) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());
        let raw_body = &text[whole.end()..end];
        let body = RE_SPACES.replace_all(raw_body.trim(), " ").to_string();

        if body.chars().count() < MIN_CONSTRUCT_BODY {
            continue;
        }
        let lower = body.to_lowercase();
        if REFERENCE_VERBS.iter().any(|v| lower.starts_with(v)) {
            debug!("Skipping reference to {} (not a declaration)", kw.as_str());
            continue;
        }

        out.push(AcademicConstruct {
            kind,
            label: caps.get(2).map(|m| m.as_str().to_string()),
            title: caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .filter(|t| !t.is_empty()),
            body,
        });
    }
    out
}

// ── Incremental builds ───────────────────────────────────────────────────────

/// Mark slides that re-show their predecessor with more content revealed.
///
/// A build has the same title as the previous slide, text similarity above
/// 0.7, and strictly longer text. Its `new_content` holds the lines the
/// previous slide did not have.
pub fn detect_incremental_builds(slides: &mut [SlideRecord]) {
    for i in 1..slides.len() {
        let (before, after) = slides.split_at_mut(i);
        let prev = &before[i - 1];
        let curr = &mut after[0];

        let prev_title = prev.title.as_deref().unwrap_or("").trim();
        let curr_title = curr.title.as_deref().unwrap_or("").trim();
        if prev_title != curr_title {
            continue;
        }
        let prev_text = prev.body.trim();
        let curr_text = curr.body.trim();
        if prev_text.is_empty() || curr_text.is_empty() || curr_text.len() <= prev_text.len() {
            continue;
        }

        let similarity = TextDiff::from_chars(prev_text, curr_text).ratio();
        if similarity > BUILD_SIMILARITY {
            let new_content = new_lines(prev_text, curr_text);
            debug!(
                "Slide {} builds on slide {} (similarity {:.2})",
                curr.index, prev.index, similarity
            );
            curr.builds_on = Some(prev.index);
            curr.new_content = Some(new_content);
        }
    }
}

fn new_lines(previous: &str, current: &str) -> String {
    let seen: HashSet<&str> = previous
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    current
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !seen.contains(l))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(index: usize, text: &str) -> RawSlide {
        RawSlide {
            index,
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn title_prefers_heading_then_first_line() {
        assert_eq!(
            extract_title("intro line\n## Polyhedra\n- a").as_deref(),
            Some("Polyhedra")
        );
        assert_eq!(extract_title("\n\n  Duality  \nbody").as_deref(), Some("Duality"));
        assert_eq!(extract_title("   \n"), None);
        let long = "x".repeat(300);
        assert_eq!(extract_title(&long).unwrap().len(), MAX_TITLE_CHARS);
    }

    #[test]
    fn explicit_title_wins() {
        let slide = build_slide(RawSlide {
            title_hint: Some("From Placeholder".into()),
            ..raw(1, "Other first line")
        });
        assert_eq!(slide.title.as_deref(), Some("From Placeholder"));
    }

    #[test]
    fn bullets_accept_common_markers() {
        let text = "Title\n• one\n- two\n▪ three\n1. four\n2) five\nplain";
        assert_eq!(
            extract_bullets(text),
            vec!["one", "two", "three", "four", "five"]
        );
    }

    #[test]
    fn slide_types() {
        assert_eq!(infer_slide_type("anything", 0, 0), SlideType::Title);
        assert_eq!(infer_slide_type("figs", 2, 3), SlideType::DiagramHeavy);
        assert_eq!(infer_slide_type("Part II\nDuality", 0, 3), SlideType::SectionHeader);
        assert_eq!(
            infer_slide_type("Summary\n- a\n- b\n- c\n- d", 0, 9),
            SlideType::Conclusion
        );
        assert_eq!(infer_slide_type("Simplex steps", 1, 4), SlideType::Content);
    }

    #[test]
    fn multi_line_construct_body_is_captured() {
        let text = "Extreme points\nDefinition 3.1 (Extreme point). A point x in P is an\nextreme point if it is not a convex\ncombination of two other points.\nTheorem 3.2: Every bounded polyhedron has one.";
        let constructs = extract_constructs(text);
        assert_eq!(constructs.len(), 2);
        let def = &constructs[0];
        assert_eq!(def.kind, ConstructKind::Definition);
        assert_eq!(def.label.as_deref(), Some("3.1"));
        assert_eq!(def.title.as_deref(), Some("Extreme point"));
        assert_eq!(
            def.body,
            "A point x in P is an extreme point if it is not a convex combination of two other points."
        );
        assert_eq!(constructs[1].kind, ConstructKind::Theorem);
    }

    #[test]
    fn references_are_not_declarations() {
        let text = "Corollary 2.4 implies that the LP is bounded.\nBy Theorem 3 we conclude.\nLemma 1: short";
        assert!(extract_constructs(text).is_empty());
    }

    #[test]
    fn uppercase_keywords_match() {
        let c = extract_constructs("THEOREM 5 Strong duality holds for feasible LPs.");
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].kind, ConstructKind::Theorem);
    }

    #[test]
    fn incremental_build_records_only_new_lines() {
        let slides = build_deck(vec![
            raw(0, "Course"),
            raw(1, "Simplex\n- Pick entering variable\n- Ratio test"),
            raw(2, "Simplex\n- Pick entering variable\n- Ratio test\n- Pivot"),
            raw(3, "Duality\n- Weak duality"),
        ]);
        assert_eq!(slides[2].builds_on, Some(1));
        assert_eq!(slides[2].new_content.as_deref(), Some("Pivot"));
        assert!(!slides[1].is_incremental_build());
        assert!(!slides[3].is_incremental_build());
    }

    #[test]
    fn same_title_but_different_text_is_not_a_build() {
        let slides = build_deck(vec![
            raw(0, "Examples\nFirst we look at a transportation problem"),
            raw(1, "Examples\nzzzz 9999 zzzz 9999 zzzz 9999 zzzz 9999 zzzz 9999 zzzz 9999"),
        ]);
        assert!(!slides[1].is_incremental_build());
    }

    #[test]
    fn indices_are_preserved() {
        let slides = build_deck((0..5).map(|i| raw(i, "t")).collect());
        let idx: Vec<usize> = slides.iter().map(|s| s.index).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }
}
