//! Text extraction for supported document formats.
//!
//! PDF extraction is per-page so that chunks keep citable page numbers.
//! Plain text is read as UTF-8 in full and treated as a single page. Pages
//! come back already normalized.

use crate::chunk::normalize;
use crate::error::{EngineError, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// Extracted document text, one entry per page.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub num_pages: usize,
    pub pages: Vec<String>,
}

/// Extracts normalized page texts from raw file bytes.
///
/// Malformed input fails with the extraction error kind; the ingestion
/// pipeline surfaces that per file and continues with the next one.
pub fn extract(bytes: &[u8], content_type: &str) -> Result<ExtractedDocument> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT => extract_text(bytes),
        other => Err(EngineError::Extract(format!(
            "unsupported content type: {}",
            other
        ))),
    }
}

/// Guess the MIME type from a file extension. Anything that is not a PDF is
/// treated as plain text.
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => MIME_PDF,
        _ => MIME_TEXT,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedDocument> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| EngineError::Extract(format!("PDF extraction failed: {}", e)))?;

    let pages: Vec<String> = pages.iter().map(|p| normalize(p)).collect();
    Ok(ExtractedDocument {
        num_pages: pages.len(),
        pages,
    })
}

fn extract_text(bytes: &[u8]) -> Result<ExtractedDocument> {
    let text = String::from_utf8_lossy(bytes);
    Ok(ExtractedDocument {
        num_pages: 1,
        pages: vec![normalize(&text)],
    })
}
