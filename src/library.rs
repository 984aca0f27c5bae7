//! Application root: owns the catalog handle, the stores and the workers.

use crate::categories::CategoryEngine;
use crate::config::Config;
use crate::db::{Database, Document, join_file_name, split_file_name};
use crate::error::{AppError, Result};
use crate::fileops::{BulkOperation, FileOperationExecutor};
use crate::formats::{CoverRenderer, FormatExtractor, MetadataExtractor, ThumbnailRenderer};
use crate::import::{ImportOptions, ImportPipeline};
use crate::search::{SearchEngine, SearchView};
use crate::store::{self, CoverStore, LibraryStore};
use crate::worker::{
    BatchReport, CancellationToken, ProgressSink, TaskHandle, WorkerPool, WriterLock,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Result of comparing the catalog with the library directory.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Catalogued documents whose file is missing.
    pub missing: Vec<Document>,
    /// Files under the root with no matching catalog row.
    pub orphans: Vec<PathBuf>,
}

impl VerifyReport {
    /// Whether catalog and library agree.
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.orphans.is_empty()
    }
}

/// Handle to an opened library.
#[derive(Clone)]
pub struct Library {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Catalog.
    pub db: Database,
    store: LibraryStore,
    covers: CoverStore,
    writer: WriterLock,
    workers: WorkerPool,
    importer: ImportPipeline,
    fileops: FileOperationExecutor,
}

impl Library {
    /// Open the catalog named in the configuration.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.database.path)?;
        Self::with_database(config, db)
    }

    /// Build a library over an already opened catalog.
    pub fn with_database(config: Config, db: Database) -> Result<Self> {
        let covers = CoverStore::new(&config.library.covers_root);
        let renderer = CoverRenderer::new(
            covers.clone(),
            config.import.thumbnail_normal,
            config.import.thumbnail_mini,
        );
        Self::with_collaborators(config, db, Arc::new(FormatExtractor), Arc::new(renderer))
    }

    /// Build a library with custom extraction and rendering collaborators.
    pub fn with_collaborators(
        config: Config,
        db: Database,
        extractor: Arc<dyn MetadataExtractor>,
        renderer: Arc<dyn ThumbnailRenderer>,
    ) -> Result<Self> {
        let store = LibraryStore::new(&config.library.root);
        let covers = CoverStore::new(&config.library.covers_root);
        let writer = WriterLock::new();
        let workers = WorkerPool::new(config.workers.threads, config.workers.max_pending)?;
        let pacing = Duration::from_millis(config.import.pacing_ms);

        let importer = ImportPipeline::new(
            db.clone(),
            store.clone(),
            covers.clone(),
            extractor,
            renderer,
            writer.clone(),
        );
        let fileops = FileOperationExecutor::new(
            db.clone(),
            store.clone(),
            covers.clone(),
            config.library.trash_dir.clone(),
            writer.clone(),
        )
        .with_pacing(pacing);

        tracing::debug!(
            root = %config.library.root.display(),
            database = %config.database.path.display(),
            "Library opened"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            store,
            covers,
            writer,
            workers,
            importer,
            fileops,
        })
    }

    /// Document store.
    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    /// Cover cache.
    pub fn covers(&self) -> &CoverStore {
        &self.covers
    }

    /// Background workers.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Category rules.
    pub fn categories(&self) -> CategoryEngine {
        CategoryEngine::new(self.db.clone())
    }

    /// Search engine.
    pub fn search(&self) -> SearchEngine {
        SearchEngine::new(self.db.clone())
    }

    /// New, empty result view paged with the configured size.
    pub fn view(&self) -> SearchView {
        SearchView::new(self.search(), self.config.search.page_size)
    }

    /// Default import options from the configuration.
    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            pacing: Duration::from_millis(self.config.import.pacing_ms),
            ..Default::default()
        }
    }

    /// Path of a document's file.
    pub fn document_path(&self, doc: &Document) -> PathBuf {
        self.store.path_for(doc.id, &doc.file_name())
    }

    // ========== BACKGROUND OPERATIONS ==========

    /// Import on the calling thread.
    pub fn import(
        &self,
        sources: &[PathBuf],
        options: &ImportOptions,
        token: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport> {
        self.importer.run(sources, options, token, sink)
    }

    /// Queue an import on the worker pool.
    ///
    /// An unavailable library root is reported here, before anything is queued.
    pub fn start_import(
        &self,
        sources: Vec<PathBuf>,
        options: ImportOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<TaskHandle<Result<BatchReport>>> {
        self.store.ensure_available()?;
        let importer = self.importer.clone();
        self.workers
            .submit(move |token| importer.run(&sources, &options, token, sink.as_ref()))
    }

    /// Run a bulk operation on the calling thread.
    pub fn bulk(
        &self,
        operation: &BulkOperation,
        snapshot: Vec<Document>,
        token: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport> {
        self.fileops.run(operation, snapshot, token, sink)
    }

    /// Queue a bulk operation over a snapshot on the worker pool.
    pub fn start_bulk(
        &self,
        operation: BulkOperation,
        snapshot: Vec<Document>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<TaskHandle<Result<BatchReport>>> {
        self.store.ensure_available()?;
        let fileops = self.fileops.clone();
        self.workers
            .submit(move |token| fileops.run(&operation, snapshot, token, sink.as_ref()))
    }

    // ========== DOCUMENT OPERATIONS ==========

    /// Rename a document and its file.
    ///
    /// The file is renamed first and restored if the catalog update fails.
    pub fn rename_document(&self, id: i64, new_file_name: &str) -> Result<bool> {
        let new_file_name = new_file_name.trim();
        if new_file_name.is_empty() || new_file_name.contains(['/', '\\']) {
            return Err(AppError::Constraint(format!(
                "Invalid file name: '{}'",
                new_file_name
            )));
        }

        let _guard = self.writer.lock();
        let Some(doc) = self.db.get_document(id)? else {
            return Ok(false);
        };

        let (name, extension) = split_file_name(new_file_name);
        let from = self.document_path(&doc);
        let to = self.store.path_for(id, &join_file_name(&name, &extension));
        let moved = from != to && from.is_file();
        if moved {
            store::move_file(&from, &to)?;
        }

        let result = self.db.rename_document(id, &name, &extension);
        if matches!(result, Ok(true)) {
            tracing::info!(id, from = %doc.file_name(), to = %new_file_name, "Renamed document");
            return Ok(true);
        }

        if moved && let Err(undo) = store::move_file(&to, &from) {
            tracing::error!(
                id,
                path = %to.display(),
                error = %undo,
                "Rename could not be undone; catalog and library are inconsistent"
            );
            return Err(AppError::Internal(format!(
                "Document {} renamed on disk but not in the catalog",
                id
            )));
        }
        result
    }

    /// Flip the active flag. Returns the new state.
    pub fn toggle_active(&self, id: i64) -> Result<Option<bool>> {
        let Some(doc) = self.db.get_document(id)? else {
            return Ok(None);
        };
        let active = !doc.active;
        self.db.set_document_active(id, active)?;
        Ok(Some(active))
    }

    /// Compare catalog rows with files on disk. Read-only.
    pub fn verify(&self) -> Result<VerifyReport> {
        let documents = self.db.list_documents()?;
        let expected: HashMap<i64, String> = documents
            .iter()
            .map(|d| (d.id, store::stored_file_name(d.id, &d.file_name())))
            .collect();

        let mut report = VerifyReport::default();
        for (id, path) in self.store.list_files()? {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let known = id
                .and_then(|id| expected.get(&id))
                .is_some_and(|name| *name == file_name);
            if !known {
                report.orphans.push(path);
            }
        }

        report.missing = documents
            .into_iter()
            .filter(|d| !self.store.exists(d.id, &d.file_name()))
            .collect();

        tracing::info!(
            missing = report.missing.len(),
            orphans = report.orphans.len(),
            "Verification finished"
        );
        Ok(report)
    }
}
