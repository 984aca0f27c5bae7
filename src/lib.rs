//! doclib-rs: storage and cataloging engine for a personal document library.
//!
//! Documents are stored under a sharded directory layout keyed by their
//! catalog ID and deduplicated by content hash. A SQLite catalog keeps
//! bibliography, outline, reading state and taxonomy membership.
//!
//! # Features
//!
//! - Deterministic `<root>/<shard>/<id>_<name>` file layout
//! - SHA-256 content deduplication
//! - Import pipeline with metadata extraction (PDF, EPUB, CBZ) and thumbnails
//! - Hierarchical categories plus collections, groups, tags and keywords
//! - Field search combined with taxonomy filters and pagination
//! - Bulk copy, move, delete and trash with compensation on partial failure
//! - Bounded background workers with cancellation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Category tree engine and outline trees.
pub mod categories;
/// Configuration and CLI.
pub mod config;
/// Catalog database operations.
pub mod db;
/// Content hashing and duplicate detection.
pub mod dedup;
/// Error types.
pub mod error;
/// Bulk file operations.
pub mod fileops;
/// Document format handlers.
pub mod formats;
/// Import pipeline.
pub mod import;
/// Application root handle.
pub mod library;
/// Query and search engine.
pub mod search;
/// Sharded file layout.
pub mod store;
/// Background workers and progress reporting.
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use library::Library;
