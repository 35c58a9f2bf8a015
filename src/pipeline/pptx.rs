//! PPTX decks: slides, title placeholders, images and speaker notes from the
//! OOXML package.
//!
//! A `.pptx` is a zip archive. Each slide is `ppt/slides/slideN.xml`; its
//! relationships (`ppt/slides/_rels/slideN.xml.rels`) point at embedded
//! media and at the notes slide. Only the handful of elements needed for
//! narration are read:
//!
//! | Element | Meaning |
//! |---------|---------|
//! | `<p:sp>` | a shape; its `<p:ph type="title">` marks the slide title |
//! | `<a:p>` | a paragraph, one line of slide text |
//! | `<a:t>` | a text run inside a paragraph |
//!
//! Slides are ordered by the number in their part name, which is the order
//! PowerPoint writes them. PPTX slides are not rasterised; the viewer falls
//! back to the slide text.

use super::encode::encode_bytes;
use super::slide_text::RawSlide;
use crate::error::LectureError;
use crate::slide::SlideImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

static RE_SLIDE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());
static RE_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<p:sp\b.*?</p:sp>").unwrap());
static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<p:ph\b[^>]*\btype="([A-Za-z]+)""#).unwrap());
static RE_PARAGRAPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<a:p\b.*?</a:p>").unwrap());
static RE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<a:t(?:\s[^>]*)?>(.*?)</a:t>").unwrap());
static RE_RELATIONSHIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Relationship\b[^>]*/?>").unwrap());
static RE_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

fn zip_error(e: impl std::fmt::Display) -> LectureError {
    LectureError::Parse {
        detail: format!("invalid PPTX archive: {e}"),
    }
}

fn open(path: &Path) -> Result<ZipArchive<File>, LectureError> {
    let file = File::open(path).map_err(|e| LectureError::io(path, e))?;
    ZipArchive::new(file).map_err(zip_error)
}

/// Slide part names in presentation order.
fn slide_parts<R: Read + Seek>(archive: &ZipArchive<R>) -> Vec<(usize, String)> {
    let mut parts: Vec<(usize, String)> = archive
        .file_names()
        .filter_map(|name| {
            let caps = RE_SLIDE_PART.captures(name)?;
            let number = caps[1].parse::<usize>().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    parts.sort_by_key(|(n, _)| *n);
    parts
}

fn read_bytes<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    Some(buf)
}

fn read_string<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<String> {
    read_bytes(archive, name).map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Number of slides, from the archive directory alone.
pub fn count_slides(path: &Path) -> Result<usize, LectureError> {
    Ok(slide_parts(&open(path)?).len())
}

pub fn extract_slides(path: &Path) -> Result<Vec<RawSlide>, LectureError> {
    extract_from(open(path)?)
}

/// Text, title, images and notes of every slide in an open archive.
pub fn extract_from<R: Read + Seek>(mut archive: ZipArchive<R>) -> Result<Vec<RawSlide>, LectureError> {
    let parts = slide_parts(&archive);
    let mut slides = Vec::with_capacity(parts.len());

    for (index, (number, part)) in parts.into_iter().enumerate() {
        let xml = read_string(&mut archive, &part).ok_or_else(|| LectureError::Parse {
            detail: format!("unreadable slide part {part}"),
        })?;
        let rels = read_string(&mut archive, &format!("ppt/slides/_rels/slide{number}.xml.rels"))
            .map(|r| parse_relationships(&r))
            .unwrap_or_default();

        let (title_hint, text) = slide_text(&xml);

        let mut images = Vec::new();
        let mut notes = None;
        for rel in &rels {
            let target = resolve_target("ppt/slides", &rel.target);
            if rel.kind.ends_with("/image") {
                let id = format!("slide{}_img{}", index, images.len());
                let data = read_bytes(&mut archive, &target).and_then(|b| encode_bytes(&b));
                if data.is_none() {
                    debug!("Slide {}: {} has no decodable pixels", index, target);
                }
                images.push(SlideImage {
                    id,
                    mime_type: "image/png".to_string(),
                    data,
                    vision_description: None,
                });
            } else if rel.kind.ends_with("/notesSlide") {
                notes = read_string(&mut archive, &target).map(|x| notes_text(&x));
            }
        }

        slides.push(RawSlide {
            index,
            text,
            title_hint,
            images,
            notes,
        });
    }

    if slides.is_empty() {
        warn!("PPTX archive contains no slide parts");
    }
    Ok(slides)
}

// ── XML helpers ──────────────────────────────────────────────────────────────

fn paragraphs(xml: &str) -> Vec<String> {
    RE_PARAGRAPH
        .find_iter(xml)
        .map(|p| {
            RE_RUN
                .captures_iter(p.as_str())
                .map(|c| unescape_xml(&c[1]))
                .collect::<String>()
        })
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn placeholder_type(shape: &str) -> Option<&str> {
    RE_PLACEHOLDER
        .captures(shape)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// (title from the title placeholder, all slide text with the title first).
fn slide_text(xml: &str) -> (Option<String>, String) {
    let mut title = None;
    let mut lines = Vec::new();
    for shape in RE_SHAPE.find_iter(xml) {
        let shape = shape.as_str();
        let paras = paragraphs(shape);
        if paras.is_empty() {
            continue;
        }
        match placeholder_type(shape) {
            Some("title" | "ctrTitle") if title.is_none() => {
                let t = paras.join(" ");
                lines.insert(0, t.clone());
                title = Some(t);
            }
            Some("sldNum" | "dt" | "ftr") => {}
            _ => lines.extend(paras),
        }
    }
    (title, lines.join("\n"))
}

/// Speaker notes: the body placeholder of the notes slide.
fn notes_text(xml: &str) -> String {
    RE_SHAPE
        .find_iter(xml)
        .map(|s| s.as_str())
        .filter(|s| placeholder_type(s) == Some("body"))
        .flat_map(paragraphs)
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

#[derive(Debug, Clone, PartialEq)]
struct Relationship {
    kind: String,
    target: String,
}

fn parse_relationships(xml: &str) -> Vec<Relationship> {
    RE_RELATIONSHIP
        .find_iter(xml)
        .filter_map(|m| {
            let attrs: HashMap<&str, &str> = RE_ATTR
                .captures_iter(m.as_str())
                .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
                .collect();
            if attrs.get("TargetMode") == Some(&"External") {
                return None;
            }
            Some(Relationship {
                kind: attrs.get("Type")?.to_string(),
                target: attrs.get("Target")?.to_string(),
            })
        })
        .collect()
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            s => segments.push(s),
        }
    }
    segments.join("/")
}
