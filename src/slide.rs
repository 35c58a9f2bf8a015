//! Parsed slide records: the output of the deck parser and the input to every
//! later stage.
//!
//! A [`SlideRecord`] is built once per slide by
//! [`crate::pipeline::slide_text::build_slide`] and never mutated afterwards.
//! Later stages borrow slides; they do not annotate them in place.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Source format of an uploaded deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckFormat {
    Pdf,
    Pptx,
}

impl DeckFormat {
    /// File extension used when the upload is persisted.
    pub fn extension(self) -> &'static str {
        match self {
            DeckFormat::Pdf => "pdf",
            DeckFormat::Pptx => "pptx",
        }
    }
}

impl fmt::Display for DeckFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Coarse role of a slide inside the lecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideType {
    Title,
    #[default]
    Content,
    SectionHeader,
    Conclusion,
    DiagramHeavy,
}

/// Kind of a boxed academic construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstructKind {
    Definition,
    Theorem,
    Corollary,
    Lemma,
    Proposition,
    Property,
    Proof,
    Example,
    Remark,
    Axiom,
    Claim,
}

impl ConstructKind {
    pub const ALL: [ConstructKind; 11] = [
        ConstructKind::Definition,
        ConstructKind::Theorem,
        ConstructKind::Corollary,
        ConstructKind::Lemma,
        ConstructKind::Proposition,
        ConstructKind::Property,
        ConstructKind::Proof,
        ConstructKind::Example,
        ConstructKind::Remark,
        ConstructKind::Axiom,
        ConstructKind::Claim,
    ];

    /// Title-case keyword as it appears on a slide ("Theorem").
    pub fn keyword(self) -> &'static str {
        match self {
            ConstructKind::Definition => "Definition",
            ConstructKind::Theorem => "Theorem",
            ConstructKind::Corollary => "Corollary",
            ConstructKind::Lemma => "Lemma",
            ConstructKind::Proposition => "Proposition",
            ConstructKind::Property => "Property",
            ConstructKind::Proof => "Proof",
            ConstructKind::Example => "Example",
            ConstructKind::Remark => "Remark",
            ConstructKind::Axiom => "Axiom",
            ConstructKind::Claim => "Claim",
        }
    }

    /// Case-insensitive keyword lookup.
    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.keyword().eq_ignore_ascii_case(word))
    }
}

/// A definition, theorem, lemma, ... declared on a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicConstruct {
    pub kind: ConstructKind,
    /// Number as printed, e.g. "3.26".
    pub label: Option<String>,
    /// Parenthesised name, e.g. "Fundamental Theorem of LP".
    pub title: Option<String>,
    /// Full statement, whitespace-collapsed, spanning as many lines as the slide does.
    pub body: String,
}

/// An image embedded in a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideImage {
    /// Stable id, e.g. `slide3_img1`.
    pub id: String,
    /// MIME type of `data`.
    pub mime_type: String,
    /// Base64-encoded image bytes. Not persisted with the lecture.
    #[serde(skip)]
    pub data: Option<String>,
    /// What the vision pass saw in the image. Filled in when the lecture is
    /// assembled; parsers always leave it empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vision_description: Option<String>,
}

/// Everything the pipeline knows about one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideRecord {
    /// 0-based position in the deck.
    pub index: usize,
    pub slide_type: SlideType,
    pub title: Option<String>,
    pub bullets: Vec<String>,
    /// All slide text in reading order.
    pub body: String,
    #[serde(default)]
    pub images: Vec<SlideImage>,
    pub notes: Option<String>,
    #[serde(default)]
    pub constructs: Vec<AcademicConstruct>,
    /// Index of the slide this one progressively extends, if it is a build step.
    #[serde(default)]
    pub builds_on: Option<usize>,
    /// Lines added relative to `builds_on`.
    #[serde(default)]
    pub new_content: Option<String>,
}

impl SlideRecord {
    pub fn is_incremental_build(&self) -> bool {
        self.builds_on.is_some()
    }

    /// Title for display, falling back to the 1-based slide number.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => format!("Slide {}", self.index + 1),
        }
    }
}
