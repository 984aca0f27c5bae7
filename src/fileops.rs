//! Bulk file operations over a snapshot of documents.
//!
//! Each item is a two-step mutation: filesystem first, catalog second. When
//! the catalog step fails the filesystem step is reversed; when reversing
//! fails too the item is reported as drift.

use crate::db::{Database, Document};
use crate::error::{AppError, Result};
use crate::store::{self, CoverStore, LibraryStore};
use crate::worker::{
    BatchReport, CancellationToken, ItemOutcome, ItemReport, ProgressEvent, ProgressSink,
    WriterLock,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Kind of bulk operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkKind {
    /// Copy files to a directory; the catalog is untouched.
    Copy {
        /// Destination directory.
        dest: PathBuf,
    },
    /// Move files to a directory and drop their catalog rows.
    Move {
        /// Destination directory.
        dest: PathBuf,
    },
    /// Remove files and catalog rows.
    Delete,
    /// Move files to the trash directory and drop their catalog rows.
    Trash,
}

impl BulkKind {
    /// Whether completed items leave the view.
    pub fn removes_rows(&self) -> bool {
        !matches!(self, BulkKind::Copy { .. })
    }

    /// Whether the operation destroys library content.
    pub fn is_destructive(&self) -> bool {
        self.removes_rows()
    }
}

impl fmt::Display for BulkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkKind::Copy { dest } => write!(f, "copy to {}", dest.display()),
            BulkKind::Move { dest } => write!(f, "move to {}", dest.display()),
            BulkKind::Delete => f.write_str("delete"),
            BulkKind::Trash => f.write_str("trash"),
        }
    }
}

/// A bulk operation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperation {
    /// What to do.
    pub kind: BulkKind,
    /// Only act on documents whose file exists in the library.
    pub existing_only: bool,
}

/// Filesystem step already performed, kept to undo it.
enum Applied {
    /// Nothing on disk changed.
    Nothing,
    /// File moved from `from` to `to`.
    Moved { from: PathBuf, to: PathBuf },
}

/// Runs bulk operations item by item.
#[derive(Clone)]
pub struct FileOperationExecutor {
    db: Database,
    store: LibraryStore,
    covers: CoverStore,
    trash_dir: PathBuf,
    writer: WriterLock,
    pacing: Duration,
}

impl FileOperationExecutor {
    /// Create an executor.
    pub fn new(
        db: Database,
        store: LibraryStore,
        covers: CoverStore,
        trash_dir: PathBuf,
        writer: WriterLock,
    ) -> Self {
        Self {
            db,
            store,
            covers,
            trash_dir,
            writer,
            pacing: Duration::ZERO,
        }
    }

    /// Pause between items.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Run `operation` over `snapshot`, in snapshot order.
    ///
    /// Fails only on configuration problems detected before the first item.
    pub fn run(
        &self,
        operation: &BulkOperation,
        snapshot: Vec<Document>,
        token: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport> {
        self.store.ensure_available()?;
        match &operation.kind {
            BulkKind::Copy { dest } | BulkKind::Move { dest } => std::fs::create_dir_all(dest)?,
            BulkKind::Trash => std::fs::create_dir_all(&self.trash_dir)?,
            BulkKind::Delete => {}
        }

        let id = Uuid::new_v4();
        let total = snapshot.len();
        let mut report = BatchReport::new(id);

        tracing::info!(operation = %id, kind = %operation.kind, total, existing_only = operation.existing_only, "Starting bulk operation");
        sink.report(ProgressEvent::Started { operation: id, total });

        for (index, doc) in snapshot.iter().enumerate() {
            let name = doc.file_name();
            if token.is_cancelled() {
                report.cancelled = true;
                report.items.push(ItemReport {
                    name,
                    document_id: Some(doc.id),
                    outcome: ItemOutcome::NotProcessed,
                });
                continue;
            }

            if index > 0 && !self.pacing.is_zero() {
                std::thread::sleep(self.pacing);
            }

            sink.report(ProgressEvent::Item {
                operation: id,
                index: index + 1,
                total,
                name: name.clone(),
            });

            let item = self.process(operation, doc);
            match &item.outcome {
                ItemOutcome::Failed(e) => {
                    tracing::warn!(id = doc.id, error = %e, "Bulk item failed")
                }
                ItemOutcome::Drift(e) => {
                    tracing::error!(id = doc.id, detail = %e, "Catalog and library are inconsistent")
                }
                _ => tracing::debug!(id = doc.id, outcome = ?item.outcome, "Bulk item processed"),
            }
            report.items.push(item);
        }

        let summary = report.summary();
        tracing::info!(operation = %id, %summary, "Bulk operation finished");
        sink.report(ProgressEvent::Finished {
            operation: id,
            summary,
        });

        Ok(report)
    }

    fn process(&self, operation: &BulkOperation, snapshot_doc: &Document) -> ItemReport {
        let _guard = self.writer.lock();

        // Another operation may have removed it since the snapshot.
        let doc = match self.db.get_document(snapshot_doc.id) {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                return ItemReport::skipped(
                    snapshot_doc.file_name(),
                    Some(snapshot_doc.id),
                    "no longer in the catalog",
                );
            }
            Err(e) => {
                return ItemReport::failed(snapshot_doc.file_name(), Some(snapshot_doc.id), e.to_string());
            }
        };

        let name = doc.file_name();
        let path = self.store.path_for(doc.id, &name);
        let exists = path.is_file();
        if operation.existing_only && !exists {
            return ItemReport::skipped(name, Some(doc.id), "file not in library");
        }

        match &operation.kind {
            BulkKind::Copy { dest } => match store::copy_file(&path, &dest.join(&name)) {
                Ok(()) => ItemReport::done(name, doc.id),
                Err(e) => ItemReport::failed(name, Some(doc.id), e.to_string()),
            },
            BulkKind::Move { dest } => {
                if !exists {
                    return ItemReport::failed(name, Some(doc.id), format!("missing file: {}", path.display()));
                }
                self.saga(&doc, || {
                    let to = dest.join(&name);
                    store::move_file(&path, &to)?;
                    Ok(Applied::Moved { from: path.clone(), to })
                })
                .into()
            }
            BulkKind::Delete => self.saga(&doc, || {
                if !exists {
                    return Ok(Applied::Nothing);
                }
                // Staged next to the file so it can be restored.
                let staged = path.with_file_name(format!(".{}.deleting", store::stored_file_name(doc.id, &name)));
                store::move_file(&path, &staged)?;
                Ok(Applied::Moved { from: path.clone(), to: staged })
            })
            .and_then_staged_removal(),
            BulkKind::Trash => self.saga(&doc, || {
                if !exists {
                    return Ok(Applied::Nothing);
                }
                let to = unique_destination(&self.trash_dir, &store::stored_file_name(doc.id, &name));
                store::move_file(&path, &to)?;
                Ok(Applied::Moved { from: path.clone(), to })
            })
            .into(),
        }
    }

    /// Filesystem step, then catalog delete, reversing the first on failure.
    fn saga(&self, doc: &Document, filesystem: impl FnOnce() -> Result<Applied>) -> SagaResult {
        let name = doc.file_name();
        let applied = match filesystem() {
            Ok(applied) => applied,
            Err(e) => {
                return SagaResult::new(ItemReport::failed(name, Some(doc.id), e.to_string()), None);
            }
        };

        let catalog = match self.db.delete_document(doc.id) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::NotFound(format!("Document {}", doc.id))),
            Err(e) => Err(e),
        };

        match catalog {
            Ok(()) => {
                self.covers.remove(doc.id);
                SagaResult::new(ItemReport::done(name, doc.id), Some(applied))
            }
            Err(e) => match undo(&applied) {
                Ok(()) => SagaResult::new(
                    ItemReport::failed(name, Some(doc.id), format!("catalog update failed: {}", e)),
                    None,
                ),
                Err(undo_err) => SagaResult::new(
                    ItemReport::drift(
                        name,
                        Some(doc.id),
                        format!(
                            "catalog update failed ({}) and file could not be restored ({})",
                            e, undo_err
                        ),
                    ),
                    None,
                ),
            },
        }
    }
}

/// Outcome of a saga plus the filesystem change it committed.
struct SagaResult {
    report: ItemReport,
    committed: Option<Applied>,
}

impl SagaResult {
    fn new(report: ItemReport, committed: Option<Applied>) -> Self {
        Self { report, committed }
    }

    /// Finish a delete by removing the staged file.
    fn and_then_staged_removal(self) -> ItemReport {
        if let Some(Applied::Moved { to, .. }) = &self.committed
            && let Err(e) = std::fs::remove_file(to)
        {
            tracing::warn!(path = %to.display(), error = %e, "Failed to remove staged file");
        }
        self.report
    }
}

impl From<SagaResult> for ItemReport {
    fn from(result: SagaResult) -> Self {
        result.report
    }
}

fn undo(applied: &Applied) -> Result<()> {
    match applied {
        Applied::Nothing => Ok(()),
        Applied::Moved { from, to } => store::move_file(to, from),
    }
}

/// `dir/name`, or `dir/<uuid>_name` when taken.
fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    dir.join(format!("{}_{}", Uuid::new_v4().simple(), name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewDocument;

    fn executor(root: &Path) -> (FileOperationExecutor, Document, PathBuf) {
        let db = Database::open_memory().unwrap();
        let store = LibraryStore::new(root.join("lib"));
        std::fs::create_dir_all(store.root()).unwrap();

        let doc = db
            .insert_document(&NewDocument {
                name: "report".to_string(),
                extension: "pdf".to_string(),
                hash: "h".to_string(),
                size: 4,
            })
            .unwrap();
        let path = store.prepare_path(doc.id, &doc.file_name()).unwrap();
        std::fs::write(&path, b"data").unwrap();

        let executor = FileOperationExecutor::new(
            db,
            store,
            CoverStore::new(root.join("covers")),
            root.join("trash"),
            WriterLock::new(),
        );
        (executor, doc, path)
    }

    #[test]
    fn test_saga_reverses_move_when_catalog_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, doc, path) = executor(dir.path());
        executor.db.reject_document_deletes();

        let moved = dir.path().join("report.pdf");
        let report: ItemReport = executor
            .saga(&doc, || {
                store::move_file(&path, &moved)?;
                Ok(Applied::Moved {
                    from: path.clone(),
                    to: moved.clone(),
                })
            })
            .into();

        assert!(matches!(report.outcome, ItemOutcome::Failed(_)));
        assert!(path.is_file());
        assert!(!moved.exists());
    }

    #[test]
    fn test_saga_reports_drift_when_undo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, doc, path) = executor(dir.path());
        executor.db.reject_document_deletes();

        // The moved file disappears before it can be put back.
        let moved = dir.path().join("report.pdf");
        let report: ItemReport = executor
            .saga(&doc, || {
                store::move_file(&path, &moved)?;
                std::fs::remove_file(&moved)?;
                Ok(Applied::Moved {
                    from: path.clone(),
                    to: moved.clone(),
                })
            })
            .into();

        assert!(matches!(report.outcome, ItemOutcome::Drift(_)));
        assert_eq!(report.document_id, Some(doc.id));
        assert!(executor.db.get_document(doc.id).unwrap().is_some());
    }

    #[test]
    fn test_unique_destination_avoids_clash() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_destination(dir.path(), "a.pdf");
        assert_eq!(first, dir.path().join("a.pdf"));

        std::fs::write(&first, b"x").unwrap();
        let second = unique_destination(dir.path(), "a.pdf");
        assert_ne!(second, first);
        assert!(second.to_string_lossy().ends_with("_a.pdf"));
    }
}
