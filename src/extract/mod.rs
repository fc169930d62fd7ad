//! Plain-text extraction from uploaded resume documents.
//!
//! Supported inputs:
//! - PDF (page text joined by blank lines)
//! - DOCX (non-empty paragraphs joined by blank lines)
//! - plain text and markdown
//!
//! Every extractor's output goes through [`clean_text`] before it is
//! returned, so callers always see the same whitespace shape.

use std::path::Path;

mod docx;
mod pdf;
mod text;

/// Declared (or sniffed) format of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    /// Legacy binary Word document. Recognised only to be rejected.
    Doc,
    #[serde(rename = "txt", alias = "text")]
    Text,
    #[serde(rename = "md", alias = "markdown")]
    Markdown,
}

impl DocumentFormat {
    /// Resolve the format from a filename extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Guess the format from the leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let kind = infer::get(bytes)?;
        match kind.mime_type() {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::Docx)
            }
            "application/msword" => Some(Self::Doc),
            _ => None,
        }
    }

    /// Filename extension first, content sniffing as a fallback.
    pub fn detect(filename: &str, bytes: &[u8]) -> Option<Self> {
        Self::from_filename(filename).or_else(|| Self::sniff(bytes))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Text => "txt",
            Self::Markdown => "md",
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("document contains no text")]
    Empty,
}

/// Turns raw document bytes into cleaned plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError>;
}

/// Default extractor dispatching on [`DocumentFormat`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExtractor;

impl FileExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TextExtractor for FileExtractor {
    fn extract(&self, bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
        let raw = match format {
            DocumentFormat::Pdf => pdf::extract_pdf_text(bytes)?,
            DocumentFormat::Docx => docx::extract_docx_text(bytes)?,
            DocumentFormat::Doc => {
                return Err(ExtractError::UnsupportedFormat(
                    ".doc (binary) files are not supported directly, convert to .docx first"
                        .to_string(),
                ))
            }
            DocumentFormat::Text | DocumentFormat::Markdown => text::extract_plain_text(bytes),
        };

        let cleaned = clean_text(&raw);
        if cleaned.is_empty() {
            return Err(ExtractError::Empty);
        }

        Ok(cleaned)
    }
}

/// Read a document from disk and extract it, resolving the format from
/// the file name or its content.
pub fn extract_path(extractor: &dyn TextExtractor, path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractError::NotFound(path.display().to_string()),
        _ => ExtractError::Corrupt(format!("{}: {}", path.display(), e)),
    })?;

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let format = DocumentFormat::detect(&filename, &bytes)
        .ok_or_else(|| ExtractError::UnsupportedFormat(filename.clone()))?;

    extractor.extract(&bytes, format)
}

/// Normalize extracted text:
/// - strip trailing whitespace of every line
/// - drop fully blank lines
/// - collapse runs of 3+ newlines to 2
/// - trim the whole document
pub fn clean_text(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let mut text = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    while text.contains("\n\n\n") {
        text = text.replace("\n\n\n", "\n\n");
    }

    text.trim().to_string()
}
