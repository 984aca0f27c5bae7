//! Import pipeline.
//!
//! Every source file walks the same stages:
//! `Selected -> Hashed -> Checked -> CatalogInserted -> MetadataExtracted ->
//! Placed -> ThumbnailGenerated -> Completed`.
//! When moving, the thumbnail is rendered before placement since the source
//! path disappears with the move. Duplicates stop at `Checked`.

use crate::db::{Bibliography, Database, NewDocument, TaxonomyKind, split_file_name};
use crate::dedup::{Deduplicator, compute_hash};
use crate::error::{AppError, Result};
use crate::formats::{ExtractedMetadata, MetadataExtractor, OutlineEntry, ThumbnailRenderer, keys};
use crate::store::{self, CoverStore, LibraryStore};
use crate::worker::{
    BatchReport, CancellationToken, ItemReport, ItemOutcome, ProgressEvent, ProgressSink,
    WriterLock,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// What happens to the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Leave the source in place.
    #[default]
    Copy,
    /// Remove the source once it is in the library.
    Move,
}

/// Stage reached by an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportStage {
    /// Picked for import.
    Selected,
    /// Content hash computed.
    Hashed,
    /// Duplicate check done.
    Checked,
    /// Catalog row created.
    CatalogInserted,
    /// Metadata stored.
    MetadataExtracted,
    /// File copied or moved into the library.
    Placed,
    /// Thumbnails written.
    ThumbnailGenerated,
    /// Finished.
    Completed,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportStage::Selected => "selection",
            ImportStage::Hashed => "hashing",
            ImportStage::Checked => "duplicate check",
            ImportStage::CatalogInserted => "catalog insert",
            ImportStage::MetadataExtracted => "metadata extraction",
            ImportStage::Placed => "placement",
            ImportStage::ThumbnailGenerated => "thumbnail generation",
            ImportStage::Completed => "completion",
        };
        f.write_str(name)
    }
}

/// Options of one import batch.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Copy or move.
    pub mode: ImportMode,
    /// Category to assign imported documents to.
    pub category: Option<i64>,
    /// Collection to assign imported documents to.
    pub collection: Option<i64>,
    /// Pause between items.
    pub pacing: Duration,
}

/// Expand directories into the files they contain, sorted per directory.
pub fn collect_sources(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect();
            files.sort();
            sources.extend(files);
        } else {
            sources.push(path.clone());
        }
    }
    sources
}

/// Hashed source ready for the duplicate check.
struct HashedSource {
    new_document: NewDocument,
}

/// Runs import batches sequentially, one item at a time.
#[derive(Clone)]
pub struct ImportPipeline {
    db: Database,
    store: LibraryStore,
    covers: CoverStore,
    dedup: Deduplicator,
    extractor: Arc<dyn MetadataExtractor>,
    renderer: Arc<dyn ThumbnailRenderer>,
    writer: WriterLock,
}

impl ImportPipeline {
    /// Create a pipeline over a catalog and a store.
    pub fn new(
        db: Database,
        store: LibraryStore,
        covers: CoverStore,
        extractor: Arc<dyn MetadataExtractor>,
        renderer: Arc<dyn ThumbnailRenderer>,
        writer: WriterLock,
    ) -> Self {
        Self {
            dedup: Deduplicator::new(db.clone()),
            db,
            store,
            covers,
            extractor,
            renderer,
            writer,
        }
    }

    /// Import `sources` in order.
    ///
    /// Fails only when the library root is unavailable, before touching
    /// anything; item failures are recorded in the report.
    pub fn run(
        &self,
        sources: &[PathBuf],
        options: &ImportOptions,
        token: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport> {
        self.store.ensure_available()?;

        let operation = Uuid::new_v4();
        let total = sources.len();
        let mut report = BatchReport::new(operation);

        tracing::info!(%operation, total, mode = ?options.mode, "Starting import");
        sink.report(ProgressEvent::Started { operation, total });

        for (index, source) in sources.iter().enumerate() {
            let name = display_name(source);
            if token.is_cancelled() {
                report.cancelled = true;
                report.items.push(ItemReport {
                    name,
                    document_id: None,
                    outcome: ItemOutcome::NotProcessed,
                });
                continue;
            }

            if index > 0 && !options.pacing.is_zero() {
                std::thread::sleep(options.pacing);
            }

            sink.report(ProgressEvent::Item {
                operation,
                index: index + 1,
                total,
                name: name.clone(),
            });

            let item = self.import_one(source, &name, options);
            match &item.outcome {
                ItemOutcome::Failed(e) => {
                    tracing::warn!(source = %source.display(), error = %e, "Import failed")
                }
                ItemOutcome::Drift(e) => {
                    tracing::error!(source = %source.display(), detail = %e, "Import left catalog and library inconsistent")
                }
                _ => tracing::debug!(source = %source.display(), outcome = ?item.outcome, "Imported item"),
            }
            report.items.push(item);
        }

        let summary = report.summary();
        tracing::info!(%operation, %summary, "Import finished");
        sink.report(ProgressEvent::Finished { operation, summary });

        Ok(report)
    }

    fn import_one(&self, source: &Path, name: &str, options: &ImportOptions) -> ItemReport {
        let hashed = match Self::hash_source(source) {
            Ok(h) => h,
            Err(e) => return ItemReport::failed(name, None, format!("{}: {}", ImportStage::Hashed, e)),
        };

        let _guard = self.writer.lock();

        match self.dedup.existing(&hashed.new_document.hash) {
            Ok(Some(existing)) => {
                return ItemReport::skipped(
                    name,
                    Some(existing.id),
                    format!("already exists as document {}", existing.id),
                );
            }
            Ok(None) => {}
            Err(e) => {
                return ItemReport::failed(name, None, format!("{}: {}", ImportStage::Checked, e));
            }
        }

        let doc = match self.db.insert_document(&hashed.new_document) {
            Ok(doc) => doc,
            Err(e) if e.is_duplicate() => {
                return ItemReport::skipped(name, None, "already exists");
            }
            Err(e) => {
                return ItemReport::failed(
                    name,
                    None,
                    format!("{}: {}", ImportStage::CatalogInserted, e),
                );
            }
        };
        tracing::debug!(id = doc.id, stage = %ImportStage::CatalogInserted, "Catalog row created");

        let metadata = self.store_metadata(source, doc.id);
        let title = metadata
            .get(keys::TITLE)
            .map(String::from)
            .unwrap_or_else(|| doc.name.clone());

        // The source vanishes with the move.
        if options.mode == ImportMode::Move {
            self.render_thumbnail(source, doc.id, &title);
        }

        let target = match self.place(source, doc.id, &doc.file_name(), options.mode) {
            Ok(target) => target,
            Err(e) => return self.compensate_insert(name, doc.id, e),
        };
        tracing::debug!(id = doc.id, target = %target.display(), stage = %ImportStage::Placed, "Placed file");

        if options.mode == ImportMode::Copy {
            self.render_thumbnail(&target, doc.id, &title);
        }

        self.assign(doc.id, TaxonomyKind::Category, options.category);
        self.assign(doc.id, TaxonomyKind::Collection, options.collection);

        tracing::debug!(id = doc.id, stage = %ImportStage::Completed, "Import complete");
        ItemReport::done(name, doc.id)
    }

    fn hash_source(source: &Path) -> Result<HashedSource> {
        if !source.is_file() {
            return Err(AppError::NotFound(format!(
                "not a file: {}",
                source.display()
            )));
        }

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::InvalidFormat(format!("unusable file name: {}", source.display())))?
            .to_string();
        let (name, extension) = split_file_name(&file_name);
        let size = std::fs::metadata(source)?.len() as i64;
        let hash = compute_hash(source)?;

        Ok(HashedSource {
            new_document: NewDocument {
                name,
                extension,
                hash,
                size,
            },
        })
    }

    /// Extract and persist metadata, bibliography and outline. Best effort.
    fn store_metadata(&self, source: &Path, id: i64) -> ExtractedMetadata {
        let metadata = match self.extractor.extract(source) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(id, source = %source.display(), error = %e, "Metadata extraction failed");
                return ExtractedMetadata::default();
            }
        };

        let map = metadata.to_catalog_map();
        if !map.is_empty()
            && let Err(e) = self.db.set_metadata(id, &map)
        {
            tracing::warn!(id, error = %e, "Failed to store metadata");
        }

        let bibliography = seed_bibliography(id, &metadata);
        if bibliography != (Bibliography { document_id: id, ..Default::default() })
            && let Err(e) = self.db.save_bibliography(&bibliography)
        {
            tracing::warn!(id, error = %e, "Failed to store bibliography");
        }

        if let Err(e) = self.store_outline(id, &metadata.outline) {
            tracing::warn!(id, error = %e, "Failed to store outline");
        }

        tracing::debug!(id, fields = map.len(), stage = %ImportStage::MetadataExtracted, "Metadata stored");
        metadata
    }

    fn store_outline(&self, id: i64, outline: &[OutlineEntry]) -> Result<()> {
        for (index, entry) in outline.iter().enumerate() {
            let number = index as i64 + 1;
            let chapter = self.db.add_chapter(id, number, &entry.title, entry.page)?;
            self.store_sections(chapter.id, &entry.children, None, &number.to_string())?;
        }
        Ok(())
    }

    fn store_sections(
        &self,
        chapter_id: i64,
        entries: &[OutlineEntry],
        parent_id: Option<i64>,
        prefix: &str,
    ) -> Result<()> {
        for (index, entry) in entries.iter().enumerate() {
            let level = format!("{}.{}", prefix, index + 1);
            let section = self
                .db
                .add_section(chapter_id, &entry.title, &level, parent_id, entry.page)?;
            self.store_sections(chapter_id, &entry.children, Some(section.id), &level)?;
        }
        Ok(())
    }

    fn place(&self, source: &Path, id: i64, file_name: &str, mode: ImportMode) -> Result<PathBuf> {
        let target = self.store.prepare_path(id, file_name)?;
        match mode {
            ImportMode::Copy => store::copy_file(source, &target)?,
            ImportMode::Move => store::move_file(source, &target)?,
        }
        Ok(target)
    }

    fn render_thumbnail(&self, source: &Path, id: i64, title: &str) {
        match self.renderer.render(source, id, title) {
            Ok(()) => tracing::debug!(id, stage = %ImportStage::ThumbnailGenerated, "Thumbnails rendered"),
            Err(e) => tracing::warn!(id, error = %e, "Thumbnail generation failed"),
        }
    }

    fn assign(&self, id: i64, kind: TaxonomyKind, entry: Option<i64>) {
        let Some(entry) = entry else { return };
        if let Err(e) = self.db.add_membership(kind, id, entry) {
            tracing::warn!(id, %kind, entry, error = %e, "Failed to assign document");
        }
    }

    /// Undo the catalog insert after a failed placement.
    fn compensate_insert(&self, name: &str, id: i64, error: AppError) -> ItemReport {
        self.covers.remove(id);
        match self.db.delete_document(id) {
            Ok(_) => ItemReport::failed(name, None, format!("{}: {}", ImportStage::Placed, error)),
            Err(undo) => ItemReport::drift(
                name,
                Some(id),
                format!(
                    "{}: {}; catalog row {} could not be removed: {}",
                    ImportStage::Placed,
                    error,
                    id,
                    undo
                ),
            ),
        }
    }
}

/// Bibliography fields derivable from extracted metadata.
fn seed_bibliography(id: i64, metadata: &ExtractedMetadata) -> Bibliography {
    let owned = |key| metadata.get(key).map(String::from);
    Bibliography {
        document_id: id,
        title: owned(keys::TITLE),
        authors: owned(keys::AUTHOR),
        year: metadata.get(keys::DATE).and_then(parse_year),
        publisher: owned(keys::PUBLISHER),
        language: owned(keys::LANGUAGE),
        pages: metadata.page_count.map(i64::from),
        isbn: owned(keys::ISBN),
        ..Default::default()
    }
}

/// Year from dates like `2019`, `2019-04-01` or PDF `D:20190401...`.
fn parse_year(date: &str) -> Option<i32> {
    let digits: String = date
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    (digits.len() == 4).then(|| digits.parse().ok()).flatten()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
