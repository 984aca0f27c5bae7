mod documents;
mod outline;
mod reading;
mod schema;
mod taxonomy;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalogued document. The content hash is unique across the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document ID (also determines the shard on disk).
    pub id: i64,
    /// File name without extension.
    pub name: String,
    /// Extension without the leading dot (may be empty).
    pub extension: String,
    /// Hex-encoded SHA-256 of the file contents.
    pub hash: String,
    /// File size in bytes.
    pub size: i64,
    /// Whether the document is active.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl Document {
    /// File name as stored on disk after the `<id>_` prefix.
    pub fn file_name(&self) -> String {
        join_file_name(&self.name, &self.extension)
    }
}

/// Values needed to insert a new document.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// File name without extension.
    pub name: String,
    /// Extension without the leading dot.
    pub extension: String,
    /// Hex-encoded content hash.
    pub hash: String,
    /// File size in bytes.
    pub size: i64,
}

/// Bibliographic record, one per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bibliography {
    /// Owning document.
    pub document_id: i64,
    /// Title.
    pub title: Option<String>,
    /// Authors, free text.
    pub authors: Option<String>,
    /// Publication year.
    pub year: Option<i32>,
    /// Publisher.
    pub publisher: Option<String>,
    /// Place of publication.
    pub place: Option<String>,
    /// Edition.
    pub edition: Option<String>,
    /// Language code.
    pub language: Option<String>,
    /// Volume.
    pub volume: Option<String>,
    /// Page count.
    pub pages: Option<i64>,
    /// ISBN.
    pub isbn: Option<String>,
}

/// Chapter of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter ID.
    pub id: i64,
    /// Owning document.
    pub document_id: i64,
    /// Chapter number, defines ordering.
    pub number: i64,
    /// Chapter title.
    pub title: String,
    /// First page.
    pub start_page: Option<i64>,
}

/// Section inside a chapter. Sections nest through `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Section ID.
    pub id: i64,
    /// Owning chapter.
    pub chapter_id: i64,
    /// Section title.
    pub title: String,
    /// Level label ("1.2", "a", ...).
    pub level: String,
    /// Parent section, `None` for chapter-level sections.
    pub parent_id: Option<i64>,
    /// Page.
    pub page: Option<i64>,
}

/// Hierarchical category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category ID.
    pub id: i64,
    /// Parent category, `None` for roots.
    pub parent_id: Option<i64>,
    /// Unique name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
}

/// Entry of a flat taxonomy (collection, group, tag or keyword).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxon {
    /// Entry ID.
    pub id: i64,
    /// Unique name within its taxonomy.
    pub name: String,
    /// Description.
    pub description: Option<String>,
}

/// Classification schemes a document can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomyKind {
    /// Collections.
    Collection,
    /// Groups.
    Group,
    /// Tags.
    Tag,
    /// Keywords.
    Keyword,
    /// Hierarchical categories.
    Category,
}

impl TaxonomyKind {
    /// Flat taxonomies (everything except categories).
    pub const FLAT: [TaxonomyKind; 4] = [
        TaxonomyKind::Collection,
        TaxonomyKind::Group,
        TaxonomyKind::Tag,
        TaxonomyKind::Keyword,
    ];

    /// Entity table.
    pub fn table(&self) -> &'static str {
        match self {
            TaxonomyKind::Collection => "coleccion",
            TaxonomyKind::Group => "grupo",
            TaxonomyKind::Tag => "etiqueta",
            TaxonomyKind::Keyword => "palabra_clave",
            TaxonomyKind::Category => "categoria",
        }
    }

    /// Junction table linking documents to entries.
    pub fn junction(&self) -> &'static str {
        match self {
            TaxonomyKind::Collection => "documento_coleccion",
            TaxonomyKind::Group => "documento_grupo",
            TaxonomyKind::Tag => "documento_etiqueta",
            TaxonomyKind::Keyword => "documento_palabra_clave",
            TaxonomyKind::Category => "documento_categoria",
        }
    }

    /// Foreign key column of the junction table.
    pub fn key_column(&self) -> &'static str {
        match self {
            TaxonomyKind::Collection => "coleccion_id",
            TaxonomyKind::Group => "grupo_id",
            TaxonomyKind::Tag => "etiqueta_id",
            TaxonomyKind::Keyword => "palabra_clave_id",
            TaxonomyKind::Category => "categoria_id",
        }
    }

    /// Whether entries are hierarchical.
    pub fn is_hierarchical(&self) -> bool {
        matches!(self, TaxonomyKind::Category)
    }
}

impl fmt::Display for TaxonomyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaxonomyKind::Collection => "collection",
            TaxonomyKind::Group => "group",
            TaxonomyKind::Tag => "tag",
            TaxonomyKind::Keyword => "keyword",
            TaxonomyKind::Category => "category",
        };
        f.write_str(name)
    }
}

impl FromStr for TaxonomyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "collection" | "coleccion" => Ok(TaxonomyKind::Collection),
            "group" | "grupo" => Ok(TaxonomyKind::Group),
            "tag" | "etiqueta" => Ok(TaxonomyKind::Tag),
            "keyword" | "palabra_clave" => Ok(TaxonomyKind::Keyword),
            "category" | "categoria" => Ok(TaxonomyKind::Category),
            other => Err(format!("unknown taxonomy: {}", other)),
        }
    }
}

/// Per-document membership flags, read from `vista_documento_taxonomia`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyFlags {
    /// Document ID.
    pub document_id: i64,
    /// Member of at least one collection.
    pub in_collection: bool,
    /// Member of at least one group.
    pub in_group: bool,
    /// Has at least one tag.
    pub tagged: bool,
    /// Has at least one keyword.
    pub has_keywords: bool,
    /// Member of at least one category.
    pub in_category: bool,
    /// Marked as favorite.
    pub favorite: bool,
}

/// Reading state derived from the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingState {
    /// Not started.
    Pending,
    /// Started but not finished.
    InProgress,
    /// Last page reached.
    Completed,
}

/// Reading progress for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    /// Document ID.
    pub document_id: i64,
    /// Current page (0 when not started).
    pub current_page: i64,
    /// Total pages, when known.
    pub total_pages: Option<i64>,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl ReadingProgress {
    /// Derive the reading state.
    pub fn state(&self) -> ReadingState {
        match (self.current_page, self.total_pages) {
            (page, _) if page <= 0 => ReadingState::Pending,
            (page, Some(total)) if total > 0 && page >= total => ReadingState::Completed,
            _ => ReadingState::InProgress,
        }
    }
}

/// Join a name and an extension into a file name.
pub fn join_file_name(name: &str, extension: &str) -> String {
    if extension.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, extension)
    }
}

/// Split a file name into name and extension.
///
/// `join_file_name` of the result gives back `file_name`: a trailing dot
/// stays in the name.
pub fn split_file_name(file_name: &str) -> (String, String) {
    match file_name.rsplit_once('.') {
        Some((name, ext)) if !name.is_empty() && !ext.is_empty() => {
            (name.to_string(), ext.to_string())
        }
        _ => (file_name.to_string(), String::new()),
    }
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
