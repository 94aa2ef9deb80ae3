// Document input - uploaded statement -> free text
//
// Mirrors the parser framework: a small trait per input format, a detector
// keyed on the file name, and a factory that hands back the right extractor.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ExtractionError, ExtractionResult};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Upload formats the tool accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
}

impl DocumentFormat {
    pub fn name(&self) -> &str {
        match self {
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::PlainText => "Texto",
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::PlainText => "text/plain",
        }
    }
}

/// An uploaded statement after text extraction.
#[derive(Debug, Clone)]
pub struct StatementDocument {
    pub file_name: String,
    pub format: DocumentFormat,
    pub text: String,
    /// SHA-256 of the uploaded bytes
    pub fingerprint: String,
}

pub trait TextExtractor: Send + Sync {
    /// Extract the document's text.
    fn extract(&self, bytes: &[u8]) -> ExtractionResult<String>;

    fn format(&self) -> DocumentFormat;
}

// ============================================================================
// DETECTION
// ============================================================================

/// Pick the format from the uploaded file name's extension.
pub fn detect_format(file_name: &str) -> ExtractionResult<DocumentFormat> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => Ok(DocumentFormat::Pdf),
        "txt" => Ok(DocumentFormat::PlainText),
        _ => Err(ExtractionError::UnsupportedFormat(file_name.to_string())),
    }
}

pub fn get_extractor(format: DocumentFormat) -> Box<dyn TextExtractor> {
    match format {
        DocumentFormat::Pdf => Box::new(PdfTextExtractor),
        DocumentFormat::PlainText => Box::new(PlainTextExtractor),
    }
}

/// Extractor for an uploaded file, chosen by its extension.
pub fn extractor_for(file_name: &str) -> ExtractionResult<Box<dyn TextExtractor>> {
    detect_format(file_name).map(get_extractor)
}

/// Detect, extract and fingerprint an upload.
pub fn read_statement(file_name: &str, bytes: &[u8]) -> ExtractionResult<StatementDocument> {
    let extractor = extractor_for(file_name)?;
    let format = extractor.format();
    let text = extractor.extract(bytes)?;

    debug!(file = file_name, format = format.name(), chars = text.len(), "Text extracted");

    Ok(StatementDocument {
        file_name: file_name.to_string(),
        format,
        text,
        fingerprint: fingerprint(bytes),
    })
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Join non-empty pages with a newline, trimming trailing space per line.
///
/// Pages are separated by form feeds in the extractor output.
pub fn normalize_pages(raw: &str) -> String {
    raw.split('\u{c}')
        .map(|page| {
            page.lines()
                .map(str::trim_end)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// EXTRACTORS
// ============================================================================

pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> ExtractionResult<String> {
        let raw = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractionError::Document(e.to_string()))?;

        let text = normalize_pages(&raw);
        if text.is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }
        Ok(text)
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }
}

pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> ExtractionResult<String> {
        let raw = std::str::from_utf8(bytes)
            .map_err(|e| ExtractionError::Document(format!("UTF-8 inválido: {}", e)))?;

        let text = normalize_pages(raw);
        if text.is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }
        Ok(text)
    }

    fn format(&self) -> DocumentFormat {
        DocumentFormat::PlainText
    }
}

// ============================================================================
// TESTS
// ============================================================================
