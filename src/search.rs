//! Query and search engine with taxonomy filtering and pagination.

use crate::db::{Database, Document, TaxonomyKind};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical search field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    /// Every indexed text column.
    #[default]
    All,
    /// File name.
    Name,
    /// File extension.
    Extension,
    /// Bibliographic title.
    Title,
    /// Authors.
    Author,
    /// Publisher.
    Publisher,
    /// Publication year.
    Year,
    /// ISBN.
    Isbn,
    /// Language.
    Language,
}

const ALL_COLUMNS: [&str; 8] = [
    "d.nombre",
    "d.extension",
    "b.titulo",
    "b.autores",
    "b.editorial",
    "b.anio",
    "b.isbn",
    "b.idioma",
];

impl SearchField {
    /// Physical columns searched for this field.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            SearchField::All => &ALL_COLUMNS,
            SearchField::Name => &ALL_COLUMNS[0..1],
            SearchField::Extension => &ALL_COLUMNS[1..2],
            SearchField::Title => &ALL_COLUMNS[2..3],
            SearchField::Author => &ALL_COLUMNS[3..4],
            SearchField::Publisher => &ALL_COLUMNS[4..5],
            SearchField::Year => &ALL_COLUMNS[5..6],
            SearchField::Isbn => &ALL_COLUMNS[6..7],
            SearchField::Language => &ALL_COLUMNS[7..8],
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchField::All => "all",
            SearchField::Name => "name",
            SearchField::Extension => "extension",
            SearchField::Title => "title",
            SearchField::Author => "author",
            SearchField::Publisher => "publisher",
            SearchField::Year => "year",
            SearchField::Isbn => "isbn",
            SearchField::Language => "language",
        };
        f.write_str(name)
    }
}

impl FromStr for SearchField {
    type Err = String;

    /// Unknown names fall back to [`SearchField::All`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "name" | "nombre" | "file" => SearchField::Name,
            "extension" | "ext" => SearchField::Extension,
            "title" | "titulo" => SearchField::Title,
            "author" | "authors" | "autor" | "autores" => SearchField::Author,
            "publisher" | "editorial" => SearchField::Publisher,
            "year" | "anio" => SearchField::Year,
            "isbn" => SearchField::Isbn,
            "language" | "idioma" => SearchField::Language,
            _ => SearchField::All,
        })
    }
}

/// Where to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchScope {
    /// The whole catalog.
    #[default]
    Catalog,
    /// Members of one taxonomy entry.
    Taxonomy {
        /// Taxonomy.
        kind: TaxonomyKind,
        /// Entry ID.
        id: i64,
    },
}

impl FromStr for SearchScope {
    type Err = AppError;

    /// Parse `KIND:ID`, e.g. `tag:3`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| AppError::Config(format!("Expected KIND:ID, got '{}'", s)))?;
        let kind = kind.parse::<TaxonomyKind>().map_err(AppError::Config)?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|e| AppError::Config(format!("Invalid ID '{}': {}", id, e)))?;
        Ok(SearchScope::Taxonomy { kind, id })
    }
}

/// Full set of search criteria.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchCriteria {
    /// Scope.
    pub scope: SearchScope,
    /// Field.
    pub field: SearchField,
    /// Term; empty matches everything in scope.
    pub term: String,
}

/// Stateless search over the catalog.
#[derive(Clone)]
pub struct SearchEngine {
    db: Database,
}

impl SearchEngine {
    /// Create an engine over a catalog.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Documents matching `criteria`, ordered by name.
    ///
    /// Taxonomy scopes resolve the membership set first, then keep the
    /// catalog-wide text matches that belong to it.
    pub fn search(&self, criteria: &SearchCriteria) -> Result<Vec<Document>> {
        let members = match criteria.scope {
            SearchScope::Catalog => None,
            SearchScope::Taxonomy { kind, id } => {
                let members = self.db.members_of(kind, id)?;
                if members.is_empty() {
                    return Ok(Vec::new());
                }
                Some(members)
            }
        };

        let term = criteria.term.trim();
        let matches = if term.is_empty() {
            self.db.list_documents()?
        } else {
            self.db.find_documents(criteria.field.columns(), term)?
        };

        Ok(match members {
            None => matches,
            Some(members) => matches
                .into_iter()
                .filter(|d| members.contains(&d.id))
                .collect(),
        })
    }
}

/// Paged, in-memory result set of one view.
///
/// Results are not invalidated by catalog writes; call [`SearchView::refresh`]
/// after a mutation.
pub struct SearchView {
    engine: SearchEngine,
    criteria: SearchCriteria,
    page_size: usize,
    page: usize,
    results: Vec<Document>,
}

impl SearchView {
    /// Create an empty view; nothing is loaded until criteria are set or
    /// [`SearchView::refresh`] is called.
    pub fn new(engine: SearchEngine, page_size: usize) -> Self {
        Self {
            engine,
            criteria: SearchCriteria::default(),
            page_size: page_size.max(1),
            page: 1,
            results: Vec::new(),
        }
    }

    /// Current criteria.
    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    /// Replace the criteria, reset to page 1 and reload.
    pub fn set_criteria(&mut self, criteria: SearchCriteria) -> Result<()> {
        self.criteria = criteria;
        self.page = 1;
        self.refresh()
    }

    /// Reload results for the current criteria, keeping the page when valid.
    pub fn refresh(&mut self) -> Result<()> {
        self.results = self.engine.search(&self.criteria)?;
        self.page = self.clamp(self.page);
        tracing::debug!(
            total = self.results.len(),
            page = self.page,
            "Search view refreshed"
        );
        Ok(())
    }

    /// Rows per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of matching documents.
    pub fn total_matches(&self) -> usize {
        self.results.len()
    }

    /// `ceil(total_matches / page_size)`.
    pub fn total_pages(&self) -> usize {
        self.results.len().div_ceil(self.page_size)
    }

    /// Current 1-based page.
    pub fn page(&self) -> usize {
        self.page
    }

    fn clamp(&self, page: usize) -> usize {
        page.clamp(1, self.total_pages().max(1))
    }

    /// Jump to a page; out-of-range requests are clamped. Returns the page shown.
    pub fn go_to_page(&mut self, page: usize) -> usize {
        self.page = self.clamp(page);
        self.page
    }

    /// Next page, if any.
    pub fn next_page(&mut self) -> bool {
        if self.page < self.total_pages() {
            self.page += 1;
            true
        } else {
            false
        }
    }

    /// Previous page, if any.
    pub fn prev_page(&mut self) -> bool {
        if self.page > 1 {
            self.page -= 1;
            true
        } else {
            false
        }
    }

    /// Rows of the current page.
    pub fn current_rows(&self) -> &[Document] {
        let start = (self.page - 1) * self.page_size;
        if start >= self.results.len() {
            return &[];
        }
        let end = (start + self.page_size).min(self.results.len());
        &self.results[start..end]
    }

    /// Stable copy of every row in the view, for bulk operations.
    pub fn snapshot(&self) -> Vec<Document> {
        self.results.clone()
    }

    /// Drop rows whose operation completed; the page is clamped afterwards.
    pub fn remove_rows(&mut self, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        self.results.retain(|d| !ids.contains(&d.id));
        self.page = self.clamp(self.page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_resolution() {
        assert_eq!("title".parse::<SearchField>().unwrap(), SearchField::Title);
        assert_eq!("autores".parse::<SearchField>().unwrap(), SearchField::Author);
        assert_eq!("whatever".parse::<SearchField>().unwrap(), SearchField::All);
        assert_eq!(SearchField::All.columns().len(), 8);
        assert_eq!(SearchField::Isbn.columns(), &["b.isbn"]);
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!(
            "tag:3".parse::<SearchScope>().unwrap(),
            SearchScope::Taxonomy {
                kind: TaxonomyKind::Tag,
                id: 3
            }
        );
        assert!("tag".parse::<SearchScope>().is_err());
        assert!("shelf:1".parse::<SearchScope>().is_err());
    }
}
