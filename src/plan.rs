//! The lecture-wide plan produced by the global context pass.
//!
//! ## Why two shapes?
//!
//! Providers answer in loosely-structured JSON. Slide numbers come back as
//! `5`, `"5"`, `5.0`, `"Slide 5"` or `"Section 1.4"`; lists sometimes arrive
//! as a bare string; whole fields go missing. [`StructuralAnalysis`] and
//! [`RawDiagram`] accept all of that as `serde_json::Value`, and
//! [`GlobalContextPlan::from_analysis`] is the single place that turns it into
//! the fixed-shape plan the rest of the pipeline relies on. Every index in a
//! finished plan is a valid slide index; nothing downstream re-checks.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ── Raw provider output ──────────────────────────────────────────────────

/// Structural analysis as returned by the provider, before normalisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralAnalysis {
    pub lecture_title: Value,
    pub sections: Value,
    pub topic_progression: Value,
    pub learning_objectives: Value,
    pub terminology: Value,
    pub prerequisites: Value,
    pub cross_references: Value,
    pub instructional_style: Value,
    pub audience_level: Value,
}

/// One diagram note from the vision pass, before normalisation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDiagram {
    #[serde(alias = "slide_idx", alias = "slide_index")]
    pub slide: Value,
    #[serde(alias = "image")]
    pub image_id: Value,
    pub description: Value,
    pub purpose: Value,
}

// ── Normalised plan ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Inclusive.
    pub start_slide: usize,
    /// Inclusive.
    pub end_slide: usize,
    pub summary: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
}

impl Section {
    pub fn contains(&self, slide: usize) -> bool {
        self.start_slide <= slide && slide <= self.end_slide
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDiagram {
    pub slide_index: usize,
    /// Image the description belongs to, when the provider named one.
    #[serde(default)]
    pub image_id: Option<String>,
    pub description: String,
    pub purpose: String,
}

/// Whole-document understanding shared by every narration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalContextPlan {
    pub lecture_title: String,
    pub total_slides: usize,
    pub sections: Vec<Section>,
    pub topic_progression: Vec<String>,
    pub learning_objectives: Vec<String>,
    pub terminology: BTreeMap<String, String>,
    pub prerequisites: Vec<String>,
    /// Slide index → earlier or later slides it refers to. Never contains the key itself.
    pub cross_references: BTreeMap<usize, Vec<usize>>,
    pub instructional_style: String,
    pub audience_level: String,
    pub key_diagrams: Vec<KeyDiagram>,
    pub created_at: DateTime<Utc>,
    pub total_tokens: u64,
}

impl GlobalContextPlan {
    /// Normalise raw provider output into a plan for a deck of `total_slides`.
    ///
    /// `fallback_title` is used when the provider did not infer a title.
    pub fn from_analysis(
        total_slides: usize,
        raw: &StructuralAnalysis,
        diagrams: &[RawDiagram],
        total_tokens: u64,
        fallback_title: &str,
    ) -> Self {
        let lecture_title = text(&raw.lecture_title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| fallback_title.to_string());

        Self {
            lecture_title,
            total_slides,
            sections: normalise_sections(&raw.sections, total_slides),
            topic_progression: string_list(&raw.topic_progression),
            learning_objectives: string_list(&raw.learning_objectives),
            terminology: normalise_terminology(&raw.terminology),
            prerequisites: string_list(&raw.prerequisites),
            cross_references: normalise_cross_references(&raw.cross_references, total_slides),
            instructional_style: text(&raw.instructional_style)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "mixed".to_string()),
            audience_level: text(&raw.audience_level)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "intermediate".to_string()),
            key_diagrams: normalise_diagrams(diagrams, total_slides),
            created_at: Utc::now(),
            total_tokens,
        }
    }

    /// First section whose range contains `slide`.
    pub fn section_for(&self, slide: usize) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(slide))
    }

    pub fn diagram_for(&self, slide: usize) -> Option<&KeyDiagram> {
        self.key_diagrams.iter().find(|d| d.slide_index == slide)
    }

    /// Cross-referenced slides that come before `slide`.
    pub fn earlier_references(&self, slide: usize) -> Vec<usize> {
        self.cross_references
            .get(&slide)
            .map(|refs| refs.iter().copied().filter(|&r| r < slide).collect())
            .unwrap_or_default()
    }

    /// True when every index in the plan is valid for a deck of `total_slides`.
    ///
    /// Used to reject cached plans written for a different deck.
    pub fn is_consistent_with(&self, total_slides: usize) -> bool {
        self.total_slides == total_slides
            && self
                .sections
                .iter()
                .all(|s| s.start_slide <= s.end_slide && s.end_slide < total_slides)
            && self.cross_references.iter().all(|(k, refs)| {
                *k < total_slides && refs.iter().all(|r| *r < total_slides && r != k)
            })
            && self.key_diagrams.iter().all(|d| d.slide_index < total_slides)
    }
}

// ── Normalisation helpers ────────────────────────────────────────────────

static RE_FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Coerce a provider value into a candidate slide index.
///
/// Integers pass through, non-negative floats are truncated, strings yield
/// their first run of digits (`"Section 1.4"` → 1). Anything else is `None`.
pub fn coerce_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                usize::try_from(u).ok()
            } else if let Some(f) = n.as_f64() {
                (f.is_finite() && f >= 0.0 && f < usize::MAX as f64).then(|| f.trunc() as usize)
            } else {
                None
            }
        }
        Value::String(s) => RE_FIRST_INT
            .find(s)
            .and_then(|m| m.as_str().parse::<usize>().ok()),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(text).collect(),
        other => text(other).into_iter().collect(),
    };
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

fn normalise_sections(value: &Value, total_slides: usize) -> Vec<Section> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    if total_slides == 0 {
        return Vec::new();
    }
    let last = total_slides - 1;

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let start = obj.get("start_slide").and_then(coerce_index).unwrap_or(0);
            if start > last {
                return None;
            }
            let end = obj
                .get("end_slide")
                .and_then(coerce_index)
                .unwrap_or(last)
                .min(last);
            if end < start {
                return None;
            }
            Some(Section {
                title: obj
                    .get("title")
                    .and_then(text)
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Untitled Section".to_string()),
                start_slide: start,
                end_slide: end,
                summary: obj.get("summary").and_then(text).unwrap_or_default(),
                key_concepts: obj.get("key_concepts").map(string_list).unwrap_or_default(),
            })
        })
        .collect()
}

fn normalise_terminology(value: &Value) -> BTreeMap<String, String> {
    let mut terms = BTreeMap::new();
    let mut insert = |term: Option<String>, definition: Option<String>| {
        if let Some(term) = term.filter(|t| !t.is_empty()) {
            terms
                .entry(term)
                .or_insert_with(|| definition.unwrap_or_default());
        }
    };

    match value {
        Value::Object(map) => {
            for (term, definition) in map {
                insert(Some(term.trim().to_string()), text(definition));
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Some(obj) = item.as_object() {
                    insert(
                        obj.get("term").and_then(text),
                        obj.get("definition").and_then(text),
                    );
                }
            }
        }
        _ => {}
    }
    terms
}

fn normalise_cross_references(value: &Value, total_slides: usize) -> BTreeMap<usize, Vec<usize>> {
    let mut out = BTreeMap::new();
    let Some(map) = value.as_object() else {
        return out;
    };

    for (key, targets) in map {
        let Some(from) = coerce_index(&Value::String(key.clone())) else {
            continue;
        };
        if from >= total_slides {
            continue;
        }

        let candidates: Vec<&Value> = match targets {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut refs: Vec<usize> = Vec::new();
        for to in candidates.into_iter().filter_map(coerce_index) {
            if to < total_slides && to != from && !refs.contains(&to) {
                refs.push(to);
            }
        }
        if !refs.is_empty() {
            let entry: &mut Vec<usize> = out.entry(from).or_default();
            for r in refs {
                if !entry.contains(&r) {
                    entry.push(r);
                }
            }
        }
    }
    out
}

fn normalise_diagrams(diagrams: &[RawDiagram], total_slides: usize) -> Vec<KeyDiagram> {
    let mut out: Vec<KeyDiagram> = Vec::new();
    for d in diagrams {
        let Some(slide_index) = coerce_index(&d.slide).filter(|&i| i < total_slides) else {
            continue;
        };
        let Some(description) = text(&d.description).filter(|t| !t.is_empty()) else {
            continue;
        };
        let image_id = text(&d.image_id).filter(|t| !t.is_empty());
        if out
            .iter()
            .any(|k| k.slide_index == slide_index && k.image_id == image_id)
        {
            continue;
        }
        out.push(KeyDiagram {
            slide_index,
            image_id,
            description,
            purpose: text(&d.purpose).unwrap_or_default(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn analysis(v: Value) -> StructuralAnalysis {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn coerce_index_handles_provider_shapes() {
        assert_eq!(coerce_index(&json!(5)), Some(5));
        assert_eq!(coerce_index(&json!(2.9)), Some(2));
        assert_eq!(coerce_index(&json!("7")), Some(7));
        assert_eq!(coerce_index(&json!("Slide 12")), Some(12));
        assert_eq!(coerce_index(&json!("Section 1.4")), Some(1));
        assert_eq!(coerce_index(&json!(-3)), None);
        assert_eq!(coerce_index(&json!("intro")), None);
        assert_eq!(coerce_index(&json!(null)), None);
        assert_eq!(coerce_index(&json!([1])), None);
    }

    #[test]
    fn cross_references_are_valid_deduplicated_and_never_self() {
        let raw = analysis(json!({
            "cross_references": {
                "3": [1, 1.0, "Section 1.4", 3, 99, "see earlier", 2.5],
                "Slide 4": "0",
                "42": [1],
                "oops": [1],
                "0": []
            }
        }));
        let plan = GlobalContextPlan::from_analysis(5, &raw, &[], 0, "Deck");
        assert_eq!(plan.cross_references.get(&3), Some(&vec![1, 2]));
        assert_eq!(plan.cross_references.get(&4), Some(&vec![0]));
        assert!(!plan.cross_references.contains_key(&42));
        assert!(!plan.cross_references.contains_key(&0));
        assert!(plan.is_consistent_with(5));
    }

    #[test]
    fn sections_are_clipped_to_the_deck() {
        let raw = analysis(json!({
            "sections": [
                {"title": "Intro", "start_slide": 0, "end_slide": 2, "summary": "basics"},
                {"title": "Body", "start_slide": "3", "end_slide": 40},
                {"title": "Ghost", "start_slide": 17, "end_slide": 20},
                {"title": "Backwards", "start_slide": 4, "end_slide": 1},
                "not an object"
            ]
        }));
        let plan = GlobalContextPlan::from_analysis(6, &raw, &[], 0, "Deck");
        assert_eq!(plan.sections.len(), 2);
        assert_eq!(plan.sections[1].start_slide, 3);
        assert_eq!(plan.sections[1].end_slide, 5);
        assert_eq!(plan.section_for(4).map(|s| s.title.as_str()), Some("Body"));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let plan = GlobalContextPlan::from_analysis(
            3,
            &StructuralAnalysis::default(),
            &[],
            12,
            "linear_programming.pdf",
        );
        assert_eq!(plan.lecture_title, "linear_programming.pdf");
        assert_eq!(plan.instructional_style, "mixed");
        assert_eq!(plan.audience_level, "intermediate");
        assert!(plan.sections.is_empty());
        assert_eq!(plan.total_tokens, 12);
    }

    #[test]
    fn terminology_accepts_map_or_list_and_keeps_first_definition() {
        let raw = analysis(json!({
            "terminology": [
                {"term": "polyhedron", "definition": "intersection of half-spaces"},
                {"term": "polyhedron", "definition": "duplicate"},
                {"term": "", "definition": "nameless"}
            ]
        }));
        let plan = GlobalContextPlan::from_analysis(2, &raw, &[], 0, "Deck");
        assert_eq!(plan.terminology.len(), 1);
        assert_eq!(plan.terminology["polyhedron"], "intersection of half-spaces");

        let raw = analysis(json!({"terminology": {"basis": "set of columns"}}));
        let plan = GlobalContextPlan::from_analysis(2, &raw, &[], 0, "Deck");
        assert_eq!(plan.terminology["basis"], "set of columns");
    }

    #[test]
    fn diagrams_outside_the_deck_are_dropped() {
        let diagrams = vec![
            RawDiagram {
                slide: json!("2"),
                image_id: json!("slide2_img0"),
                description: json!("feasible region"),
                purpose: json!("illustrate"),
            },
            RawDiagram {
                slide: json!(9),
                description: json!("out of range"),
                ..Default::default()
            },
        ];
        let plan =
            GlobalContextPlan::from_analysis(3, &StructuralAnalysis::default(), &diagrams, 0, "D");
        assert_eq!(plan.key_diagrams.len(), 1);
        assert_eq!(plan.diagram_for(2).map(|d| d.purpose.as_str()), Some("illustrate"));
        assert_eq!(
            plan.diagram_for(2).and_then(|d| d.image_id.as_deref()),
            Some("slide2_img0")
        );
    }

    #[test]
    fn plan_round_trips_through_json_with_string_keys() {
        let raw = analysis(json!({"cross_references": {"2": [0, 1]}}));
        let plan = GlobalContextPlan::from_analysis(3, &raw, &[], 0, "Deck");
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["cross_references"]["2"], json!([0, 1]));
        let back: GlobalContextPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
        assert_eq!(back.earlier_references(2), vec![0, 1]);
    }
}
