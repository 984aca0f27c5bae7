mod cbz;
pub mod cover;
mod epub;
mod pdf;

pub use cbz::CbzHandler;
pub use cover::CoverRenderer;
pub use epub::EpubHandler;
pub use pdf::PdfHandler;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Well-known metadata keys produced by the handlers.
pub mod keys {
    /// Document title.
    pub const TITLE: &str = "title";
    /// Authors, comma separated.
    pub const AUTHOR: &str = "author";
    /// Subject or description.
    pub const SUBJECT: &str = "subject";
    /// Keywords, comma separated.
    pub const KEYWORDS: &str = "keywords";
    /// Publisher.
    pub const PUBLISHER: &str = "publisher";
    /// Language code.
    pub const LANGUAGE: &str = "language";
    /// Publication date.
    pub const DATE: &str = "date";
    /// ISBN.
    pub const ISBN: &str = "isbn";
    /// Page count.
    pub const PAGES: &str = "pages";
    /// Producing software.
    pub const PRODUCER: &str = "producer";
}

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// PDF format (Portable Document Format).
    Pdf,
    /// CBZ format (Comic Book ZIP archive).
    Cbz,
    /// Anything else; stored without extraction.
    Other,
}

impl DocumentFormat {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "epub" => DocumentFormat::Epub,
            "pdf" => DocumentFormat::Pdf,
            "cbz" => DocumentFormat::Cbz,
            _ => DocumentFormat::Other,
        }
    }

    /// Detect format from a path.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Self::from_extension)
            .unwrap_or(DocumentFormat::Other)
    }
}

/// Node of a document's navigation outline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutlineEntry {
    /// Entry label.
    pub title: String,
    /// Page or play order, when known.
    pub page: Option<i64>,
    /// Nested entries.
    pub children: Vec<OutlineEntry>,
}

/// Metadata extracted from a file.
#[derive(Debug, Clone, Default)]
pub struct ExtractedMetadata {
    /// Key/value fields (see [`keys`]).
    pub fields: BTreeMap<String, String>,
    /// Number of pages, if known.
    pub page_count: Option<u32>,
    /// Navigation outline, top level first.
    pub outline: Vec<OutlineEntry>,
}

impl ExtractedMetadata {
    /// Field value, if present and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Insert a trimmed value, ignoring empty ones.
    pub fn set(&mut self, key: &str, value: &str) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            self.fields.insert(key.to_string(), trimmed.to_string());
        }
    }

    /// Fields plus the page count, as persisted in the catalog.
    pub fn to_catalog_map(&self) -> BTreeMap<String, String> {
        let mut map = self.fields.clone();
        if let Some(pages) = self.page_count {
            map.insert(keys::PAGES.to_string(), pages.to_string());
        }
        map
    }
}

/// Trait for format-specific handlers.
pub trait FormatHandler: Send + Sync {
    /// Extract metadata from a file.
    fn extract_metadata(&self, path: &Path) -> Result<ExtractedMetadata>;

    /// Extract cover image as PNG (or JPEG) bytes.
    fn extract_cover(&self, path: &Path) -> Result<Option<Vec<u8>>>;
}

/// Get the appropriate handler for a format.
pub fn get_handler(format: DocumentFormat) -> Box<dyn FormatHandler> {
    match format {
        DocumentFormat::Epub => Box::new(EpubHandler),
        DocumentFormat::Pdf => Box::new(PdfHandler),
        DocumentFormat::Cbz => Box::new(CbzHandler),
        DocumentFormat::Other => Box::new(MinimalHandler),
    }
}

/// Minimal handler for formats without special metadata.
struct MinimalHandler;

impl FormatHandler for MinimalHandler {
    fn extract_metadata(&self, _path: &Path) -> Result<ExtractedMetadata> {
        Ok(ExtractedMetadata::default())
    }

    fn extract_cover(&self, _path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Metadata extraction collaborator used by the import pipeline.
pub trait MetadataExtractor: Send + Sync {
    /// Extract metadata from the file at `path`.
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata>;
}

/// Thumbnail rendering collaborator used by the import pipeline.
pub trait ThumbnailRenderer: Send + Sync {
    /// Render both thumbnail sizes of `source` for document `id`.
    fn render(&self, source: &Path, id: i64, title: &str) -> Result<()>;
}

/// Extractor dispatching on the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatExtractor;

impl MetadataExtractor for FormatExtractor {
    fn extract(&self, path: &Path) -> Result<ExtractedMetadata> {
        get_handler(DocumentFormat::from_path(path)).extract_metadata(path)
    }
}
