use crate::db::TaxonomyKind;
use crate::error::{AppError, Result};
use crate::formats::cover::{DEFAULT_MINI_WIDTH, DEFAULT_NORMAL_WIDTH};
use crate::search::{SearchCriteria, SearchField, SearchScope};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Document library with a sharded file store and a taxonomy catalog.
#[derive(Parser, Debug, Clone)]
#[command(name = "doclib-rs")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "DOCLIB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Import files into the library.
    Import {
        /// Files or directories to import.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Move files instead of copying them.
        #[arg(long = "move")]
        move_files: bool,
        /// Assign imported documents to this category.
        #[arg(long)]
        category: Option<i64>,
        /// Assign imported documents to this collection.
        #[arg(long)]
        collection: Option<i64>,
    },

    /// Search the catalog.
    Search {
        /// Field to search (all, name, title, author, publisher, isbn, ...).
        #[arg(short, long, default_value = "all")]
        field: SearchField,
        /// Restrict to members of a taxonomy entry, as KIND:ID.
        #[arg(long = "in")]
        scope: Option<String>,
        /// Page to show.
        #[arg(short, long, default_value = "1")]
        page: usize,
        /// Search term.
        term: String,
    },

    /// Category management commands.
    Category {
        /// Category subcommand action.
        #[command(subcommand)]
        action: CategoryCommand,
    },

    /// Collection, group, tag and keyword commands.
    Taxonomy {
        /// Taxonomy subcommand action.
        #[command(subcommand)]
        action: TaxonomyCommand,
    },

    /// Single document commands.
    Doc {
        /// Document subcommand action.
        #[command(subcommand)]
        action: DocCommand,
    },

    /// Bulk file operations.
    Ops {
        /// Bulk operation to run.
        #[command(subcommand)]
        action: OpsCommand,
    },

    /// Compare the catalog with the files under the library root.
    Verify,
}

/// Category subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum CategoryCommand {
    /// Add a category.
    Add {
        /// Category name.
        name: String,
        /// Parent category ID.
        #[arg(short, long)]
        parent: Option<i64>,
        /// Description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a category without subcategories.
    Del {
        /// Category ID.
        id: i64,
    },

    /// List the children of a category (roots by default).
    List {
        /// Parent category ID.
        #[arg(short, long)]
        parent: Option<i64>,
    },

    /// Print the full category tree.
    Tree,

    /// Move a category under another parent.
    Move {
        /// Category ID.
        id: i64,
        /// New parent ID (omit to make it a root).
        #[arg(short, long)]
        parent: Option<i64>,
    },
}

/// Flat taxonomy subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum TaxonomyCommand {
    /// Add an entry.
    Add {
        /// Taxonomy: collection, group, tag or keyword.
        kind: TaxonomyKind,
        /// Entry name.
        name: String,
        /// Description.
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete an entry.
    Del {
        /// Taxonomy.
        kind: TaxonomyKind,
        /// Entry ID.
        id: i64,
    },

    /// List entries.
    List {
        /// Taxonomy.
        kind: TaxonomyKind,
    },

    /// Add a document to an entry.
    Assign {
        /// Taxonomy (category included).
        kind: TaxonomyKind,
        /// Entry ID.
        id: i64,
        /// Document ID.
        document: i64,
    },

    /// Remove a document from an entry.
    Unassign {
        /// Taxonomy (category included).
        kind: TaxonomyKind,
        /// Entry ID.
        id: i64,
        /// Document ID.
        document: i64,
    },
}

/// Document subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum DocCommand {
    /// Show a document with its bibliography and outline.
    Show {
        /// Document ID.
        id: i64,
    },

    /// Rename a document and its file.
    Rename {
        /// Document ID.
        id: i64,
        /// New file name, extension included.
        name: String,
    },

    /// Toggle the active flag.
    Toggle {
        /// Document ID.
        id: i64,
    },

    /// Mark a document as favorite.
    Favorite {
        /// Document ID.
        id: i64,
        /// Remove the mark instead.
        #[arg(long)]
        off: bool,
    },

    /// Record reading progress.
    Progress {
        /// Document ID.
        id: i64,
        /// Current page.
        page: i64,
        /// Total pages.
        #[arg(short, long)]
        total: Option<i64>,
    },
}

/// Bulk operation subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum OpsCommand {
    /// Copy files out of the library.
    Copy {
        /// Destination directory.
        #[arg(long)]
        to: PathBuf,
        /// Documents to act on.
        #[command(flatten)]
        selection: Selection,
    },

    /// Move files out of the library and drop their catalog rows.
    Move {
        /// Destination directory.
        #[arg(long)]
        to: PathBuf,
        /// Documents to act on.
        #[command(flatten)]
        selection: Selection,
    },

    /// Permanently delete files and catalog rows.
    Delete {
        /// Documents to act on.
        #[command(flatten)]
        selection: Selection,
    },

    /// Move files to the trash directory and drop their catalog rows.
    Trash {
        /// Documents to act on.
        #[command(flatten)]
        selection: Selection,
    },
}

/// Document selection shared by the bulk operations.
#[derive(Args, Debug, Clone)]
pub struct Selection {
    /// Document IDs (all documents when empty and no search is given).
    pub ids: Vec<i64>,
    /// Select the documents matching this term instead.
    #[arg(short, long)]
    pub search: Option<String>,
    /// Skip documents whose file is missing from the library.
    #[arg(long)]
    pub existing_only: bool,
    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Library locations.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Import configuration.
    #[serde(default)]
    pub import: ImportConfig,

    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Interface preferences.
    #[serde(default)]
    pub ui: UiConfig,

    /// Persisted view state, as JSON blobs.
    #[serde(default)]
    pub state: StateConfig,
}

/// Library locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the sharded document store. Never created implicitly.
    #[serde(default = "default_library_root")]
    pub root: PathBuf,

    /// Root of the cover thumbnail cache.
    #[serde(default = "default_covers_root")]
    pub covers_root: PathBuf,

    /// Directory receiving trashed files.
    #[serde(default = "default_trash_dir")]
    pub trash_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
            covers_root: default_covers_root(),
            trash_dir: default_trash_dir(),
        }
    }
}

fn default_library_root() -> PathBuf {
    PathBuf::from("data/library")
}

fn default_covers_root() -> PathBuf {
    PathBuf::from("data/covers")
}

fn default_trash_dir() -> PathBuf {
    PathBuf::from("data/trash")
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/catalog.db")
}

/// Import configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Delay between items in milliseconds, so progress stays visible.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Width of the normal thumbnail in pixels.
    #[serde(default = "default_thumbnail_normal")]
    pub thumbnail_normal: u32,

    /// Width of the mini thumbnail in pixels.
    #[serde(default = "default_thumbnail_mini")]
    pub thumbnail_mini: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            thumbnail_normal: default_thumbnail_normal(),
            thumbnail_mini: default_thumbnail_mini(),
        }
    }
}

fn default_pacing_ms() -> u64 {
    100
}

fn default_thumbnail_normal() -> u32 {
    DEFAULT_NORMAL_WIDTH
}

fn default_thumbnail_mini() -> u32 {
    DEFAULT_MINI_WIDTH
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Maximum number of queued plus running tasks.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_threads() -> usize {
    2
}

fn default_max_pending() -> usize {
    8
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Rows per result page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    50
}

/// Interface preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Theme name.
    #[serde(default = "default_theme")]
    pub theme: String,

    /// Citation style used when formatting bibliographies.
    #[serde(default = "default_citation_style")]
    pub citation_style: String,

    /// Show the taxonomy side panel.
    #[serde(default = "default_true")]
    pub show_sidebar: bool,

    /// Show the cover preview panel.
    #[serde(default = "default_true")]
    pub show_preview: bool,

    /// Show the details panel.
    #[serde(default = "default_true")]
    pub show_details: bool,

    /// Last directory imported from.
    #[serde(default)]
    pub last_import_dir: Option<PathBuf>,

    /// Last directory exported to.
    #[serde(default)]
    pub last_export_dir: Option<PathBuf>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            citation_style: default_citation_style(),
            show_sidebar: true,
            show_preview: true,
            show_details: true,
            last_import_dir: None,
            last_export_dir: None,
        }
    }
}

fn default_theme() -> String {
    "light".to_string()
}

fn default_citation_style() -> String {
    "apa".to_string()
}

fn default_true() -> bool {
    true
}

/// Raw view-state blobs, each a JSON document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Last search (term and field).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_search: Option<String>,

    /// Last taxonomy filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_filter: Option<String>,

    /// Last active tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tab: Option<String>,
}

/// Last search made in the main view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSearch {
    /// Search term.
    pub term: String,
    /// Searched field.
    pub field: SearchField,
}

/// Last taxonomy filter applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastFilter {
    /// Taxonomy.
    pub kind: TaxonomyKind,
    /// Entry ID.
    pub id: i64,
}

/// Decoded view state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Last search.
    pub last_search: Option<LastSearch>,
    /// Last taxonomy filter.
    pub last_filter: Option<LastFilter>,
    /// Last active tab.
    pub last_tab: Option<String>,
}

fn decode_blob<T: serde::de::DeserializeOwned>(name: &str, blob: Option<&String>) -> Option<T> {
    let blob = blob?;
    match serde_json::from_str(blob) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(state = name, error = %e, "Ignoring unreadable view state");
            None
        }
    }
}

fn encode_blob<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(|v| {
            serde_json::to_string(v)
                .map_err(|e| AppError::Config(format!("Failed to encode view state: {}", e)))
        })
        .transpose()
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| AppError::Config(format!("Failed to write config file: {}", e)))
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("doclib-rs.toml"),
            dirs::config_dir()
                .map(|p| p.join("doclib-rs").join("config.toml"))
                .unwrap_or_default(),
        ];

        candidates
            .into_iter()
            .find(|p| !p.as_os_str().is_empty() && p.exists())
    }

    /// Decode the persisted view state. Unreadable blobs are dropped.
    pub fn view_state(&self) -> ViewState {
        ViewState {
            last_search: decode_blob("last_search", self.state.last_search.as_ref()),
            last_filter: decode_blob("last_filter", self.state.last_filter.as_ref()),
            last_tab: decode_blob("last_tab", self.state.last_tab.as_ref()),
        }
    }

    /// Encode a view state into the `[state]` section.
    pub fn set_view_state(&mut self, view: &ViewState) -> Result<()> {
        self.state = StateConfig {
            last_search: encode_blob(view.last_search.as_ref())?,
            last_filter: encode_blob(view.last_filter.as_ref())?,
            last_tab: encode_blob(view.last_tab.as_ref())?,
        };
        Ok(())
    }

    /// Remember `criteria` as the last search and taxonomy filter.
    pub fn record_search(&mut self, criteria: &SearchCriteria) -> Result<()> {
        let mut view = self.view_state();
        view.last_search = Some(LastSearch {
            term: criteria.term.clone(),
            field: criteria.field,
        });
        view.last_filter = match criteria.scope {
            SearchScope::Catalog => None,
            SearchScope::Taxonomy { kind, id } => Some(LastFilter { kind, id }),
        };
        self.set_view_state(&view)
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# doclib-rs configuration

[library]
# Must exist before importing; it is never created automatically
root = "data/library"
covers_root = "data/covers"
trash_dir = "data/trash"

[database]
path = "data/catalog.db"

[import]
# Delay between items in milliseconds
pacing_ms = 100
thumbnail_normal = 600
thumbnail_mini = 120

[workers]
threads = 2
# Queued plus running background tasks
max_pending = 8

[search]
page_size = 50

[ui]
theme = "light"
citation_style = "apa"
show_sidebar = true
show_preview = true
show_details = true
"#
        .to_string()
    }
}
