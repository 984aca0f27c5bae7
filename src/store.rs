//! Sharded on-disk layout for document files and cover thumbnails.
//!
//! Document `id` lives under `<root>/<shard>/<id>_<file name>` where the shard
//! is `floor(id / 1000)` zero-padded to three digits, so each shard directory
//! holds at most 1000 documents.

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// Number of documents bucketed into one shard directory.
pub const SHARD_SIZE: i64 = 1000;

/// Shard directory name for a document ID.
pub fn shard(id: i64) -> String {
    format!("{:03}", id.max(0) / SHARD_SIZE)
}

/// File name of a document inside its shard.
pub fn stored_file_name(id: i64, file_name: &str) -> String {
    format!("{}_{}", id, file_name)
}

/// Physical store for document bytes.
#[derive(Debug, Clone)]
pub struct LibraryStore {
    root: PathBuf,
}

impl LibraryStore {
    /// Create a store rooted at `root`. The root is never created by the store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Library root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that the root exists and is a directory.
    pub fn ensure_available(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(AppError::NotAvailable("library root is not set".to_string()));
        }
        if !self.root.exists() {
            return Err(AppError::NotAvailable(format!(
                "library root does not exist: {}",
                self.root.display()
            )));
        }
        if !self.root.is_dir() {
            return Err(AppError::NotAvailable(format!(
                "library root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Deterministic path for a document file. Pure: touches nothing on disk.
    pub fn path_for(&self, id: i64, file_name: &str) -> PathBuf {
        self.root
            .join(shard(id))
            .join(stored_file_name(id, file_name))
    }

    /// Path for a document file, creating the shard directory if needed.
    pub fn prepare_path(&self, id: i64, file_name: &str) -> Result<PathBuf> {
        self.ensure_available()?;
        let shard_dir = self.root.join(shard(id));
        if !shard_dir.is_dir() {
            std::fs::create_dir_all(&shard_dir)?;
            tracing::debug!(shard = %shard_dir.display(), "Created shard directory");
        }
        Ok(self.path_for(id, file_name))
    }

    /// Whether the file of a document is present.
    pub fn exists(&self, id: i64, file_name: &str) -> bool {
        self.path_for(id, file_name).is_file()
    }

    /// All files under the shard directories, as `(id, path)` when the name
    /// carries an `<id>_` prefix.
    pub fn list_files(&self) -> Result<Vec<(Option<i64>, PathBuf)>> {
        self.ensure_available()?;
        let files = walkdir::WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let id = e
                    .file_name()
                    .to_str()
                    .and_then(|name| name.split_once('_'))
                    .and_then(|(prefix, _)| prefix.parse::<i64>().ok());
                (id, e.into_path())
            })
            .collect();
        Ok(files)
    }
}

/// Move a file, falling back to copy and remove across filesystems.
///
/// Fails if `to` already exists.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("destination exists: {}", to.display()),
        )));
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    std::fs::copy(from, to)?;
    if let Err(e) = std::fs::remove_file(from) {
        let _ = std::fs::remove_file(to);
        return Err(e.into());
    }
    Ok(())
}

/// Copy a file, refusing to overwrite `to`.
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("destination exists: {}", to.display()),
        )));
    }
    std::fs::copy(from, to)?;
    Ok(())
}

/// Thumbnail sizes kept per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSize {
    /// Full-size preview.
    Normal,
    /// List thumbnail.
    Mini,
}

impl CoverSize {
    fn suffix(&self) -> &'static str {
        match self {
            CoverSize::Normal => "normal",
            CoverSize::Mini => "miniatura",
        }
    }
}

/// Cover cache laid out with the same sharding as the library.
#[derive(Debug, Clone)]
pub struct CoverStore {
    root: PathBuf,
}

impl CoverStore {
    /// Create a cover store rooted at `root`. Created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of a cover thumbnail.
    pub fn path_for(&self, id: i64, size: CoverSize) -> PathBuf {
        self.root
            .join(shard(id))
            .join(format!("{}_{}.png", id, size.suffix()))
    }

    /// Path of a cover thumbnail, creating the shard directory if needed.
    pub fn prepare_path(&self, id: i64, size: CoverSize) -> Result<PathBuf> {
        let path = self.path_for(id, size);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Remove both thumbnails of a document, ignoring missing files.
    pub fn remove(&self, id: i64) {
        for size in [CoverSize::Normal, CoverSize::Mini] {
            let path = self.path_for(id, size);
            if path.exists()
                && let Err(e) = std::fs::remove_file(&path)
            {
                tracing::warn!(id, path = %path.display(), error = %e, "Failed to remove cover");
            }
        }
    }
}
