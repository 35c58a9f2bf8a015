//! Upload validation: decide whether an uploaded file is a deck we accept.
//!
//! ## Why check both extension and magic bytes?
//!
//! The extension is what the browser tells us; the magic bytes are what the
//! file actually is. A renamed `.docx` starts with `PK` like a `.pptx` but
//! carries the wrong extension, and a `.pdf` that is really an HTML error
//! page has the right extension but no `%PDF` header. Requiring both to agree
//! rejects either before the parser ever sees the file.
//!
//! Size is checked first so an oversized body is reported as such rather than
//! as a format problem.

use crate::error::LectureError;
use crate::slide::DeckFormat;
use std::path::Path;
use tracing::debug;

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Accept or reject an uploaded file, returning its format.
pub fn validate_upload(
    filename: &str,
    bytes: &[u8],
    max_file_size: u64,
) -> Result<DeckFormat, LectureError> {
    let size = bytes.len() as u64;
    if size > max_file_size {
        return Err(LectureError::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }
    if bytes.is_empty() {
        return Err(LectureError::UnsupportedFormat {
            filename: filename.to_string(),
            detail: "file is empty".into(),
        });
    }

    let format = format_from_extension(filename).ok_or_else(|| LectureError::UnsupportedFormat {
        filename: filename.to_string(),
        detail: "extension must be .pdf or .pptx".into(),
    })?;

    let magic_ok = match format {
        DeckFormat::Pdf => bytes.starts_with(PDF_MAGIC),
        DeckFormat::Pptx => bytes.starts_with(ZIP_MAGIC),
    };
    if !magic_ok {
        let head: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(LectureError::UnsupportedFormat {
            filename: filename.to_string(),
            detail: format!(
                "content does not look like a {} file (starts with {:?})",
                format, head
            ),
        });
    }

    debug!("Accepted upload '{}' as {} ({} bytes)", filename, format, size);
    Ok(format)
}

/// Deck format implied by the filename extension (case-insensitive).
pub fn format_from_extension(filename: &str) -> Option<DeckFormat> {
    let ext = Path::new(filename)
        .extension()?
        .to_string_lossy()
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(DeckFormat::Pdf),
        "pptx" => Some(DeckFormat::Pptx),
        _ => None,
    }
}

/// Strip directory components and control characters from a client filename.
///
/// The result is only ever displayed; stored files use fixed names.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.chars().take(200).collect()
    }
}
