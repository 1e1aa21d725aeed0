//! Text extraction for input documents (plain text, PDF).
//!
//! The pipeline hands this module a path and gets back one UTF-8 text blob.
//! Plain text is decoded permissively; PDFs are read page by page.

use std::path::Path;

use tracing::debug;

use crate::error::{CoderError, Result};
use crate::models::SourceDocument;

/// Extensions read as plain text.
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "csv"];
pub const PDF_EXTENSION: &str = "pdf";

/// UTF-8 punctuation misread as Windows-1252, and the real punctuation,
/// mapped to ASCII. Mis-decoded forms come first: some end in a real quote.
const REPAIRS: &[(&str, &str)] = &[
    ("\u{e2}\u{20ac}\u{a6}", "..."),
    ("\u{e2}\u{20ac}\u{153}", "\""),
    ("\u{e2}\u{20ac}\u{9d}", "\""),
    ("\u{e2}\u{20ac}\u{2dc}", "'"),
    ("\u{e2}\u{20ac}\u{2122}", "'"),
    ("\u{e2}\u{20ac}\u{201c}", "-"),
    ("\u{e2}\u{20ac}\u{201d}", "-"),
    ("\u{2026}", "..."),
    ("\u{201c}", "\""),
    ("\u{201d}", "\""),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
    ("\u{2013}", "-"),
    ("\u{2014}", "-"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
}

fn format_of(path: &Path) -> Option<Format> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if ext == PDF_EXTENSION {
        Some(Format::Pdf)
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Some(Format::Text)
    } else {
        None
    }
}

/// Whether `extract` knows how to read this file.
pub fn is_supported(path: &Path) -> bool {
    format_of(path).is_some()
}

/// Read `path` into a [`SourceDocument`].
///
/// Fails with [`CoderError::UnsupportedFormat`] for unknown extensions and
/// [`CoderError::Extraction`] when the file cannot be read or parsed.
pub fn extract(path: &Path, repair: bool) -> Result<SourceDocument> {
    let format = format_of(path).ok_or_else(|| CoderError::UnsupportedFormat(path.to_path_buf()))?;

    let bytes = std::fs::read(path).map_err(|e| CoderError::Extraction {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let text = match format {
        Format::Text => String::from_utf8_lossy(&bytes).into_owned(),
        Format::Pdf => extract_pdf(path, &bytes)?,
    };
    let text = if repair { repair_mojibake(&text) } else { text };

    debug!(file = %path.display(), chars = text.chars().count(), "extracted");
    Ok(SourceDocument {
        path: path.to_path_buf(),
        text,
    })
}

fn extract_pdf(path: &Path, bytes: &[u8]) -> Result<String> {
    let pages =
        pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| CoderError::Extraction {
            path: path.to_path_buf(),
            reason: format!("PDF extraction failed: {}", e),
        })?;
    debug!(file = %path.display(), pages = pages.len(), "read PDF pages");
    Ok(pages.concat())
}

/// Replace known mis-decoded punctuation with ASCII equivalents.
pub fn repair_mojibake(text: &str) -> String {
    let mut out = text.to_string();
    for (bad, good) in REPAIRS {
        if out.contains(bad) {
            out = out.replace(bad, good);
        }
    }
    out
}
