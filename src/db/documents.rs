use super::schema::is_unique_violation;
use crate::db::{Database, Document, NewDocument, now_timestamp};
use crate::error::{AppError, Result};
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeMap;

const DOCUMENT_COLUMNS: &str =
    "d.id, d.nombre, d.extension, d.hash, d.tamano, d.activo, d.creado_en, d.actualizado_en";

impl Database {
    // ========== DOCUMENT OPERATIONS ==========

    /// Insert a new document. A repeated content hash yields `AppError::Duplicate`.
    pub fn insert_document(&self, doc: &NewDocument) -> Result<Document> {
        let conn = self.conn();
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO documento (nombre, extension, hash, tamano, activo, creado_en, actualizado_en)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
            params![doc.name, doc.extension, doc.hash, doc.size, now],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Duplicate(doc.hash.clone())
            } else {
                AppError::Internal(format!("Failed to insert document: {}", e))
            }
        })?;

        Ok(Document {
            id: conn.last_insert_rowid(),
            name: doc.name.clone(),
            extension: doc.extension.clone(),
            hash: doc.hash.clone(),
            size: doc.size,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get document by ID.
    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documento d WHERE d.id = ?1"),
            params![id],
            Self::row_to_document,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get document: {}", e)))
    }

    /// Get document by content hash.
    pub fn get_document_by_hash(&self, hash: &str) -> Result<Option<Document>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documento d WHERE d.hash = ?1"),
            params![hash],
            Self::row_to_document,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get document by hash: {}", e)))
    }

    /// List all documents ordered by name, then ID.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documento d ORDER BY d.nombre COLLATE NOCASE, d.id"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let docs = stmt
            .query_map([], Self::row_to_document)
            .map_err(|e| AppError::Internal(format!("Failed to list documents: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect documents: {}", e)))?;

        Ok(docs)
    }

    /// Count documents.
    pub fn count_documents(&self) -> Result<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM documento", [], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to count documents: {}", e)))
    }

    /// Find documents where any of `columns` matches `term` (case-insensitive substring).
    ///
    /// Columns must come from the search field whitelist; they are spliced into SQL.
    pub fn find_documents(&self, columns: &[&str], term: &str) -> Result<Vec<Document>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let filter = columns
            .iter()
            .map(|c| format!("{c} LIKE ?1 ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documento d
             LEFT JOIN bibliografia b ON b.documento_id = d.id
             WHERE {filter}
             ORDER BY d.nombre COLLATE NOCASE, d.id"
        );
        let pattern = format!("%{}%", escape_like(term));

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let docs = stmt
            .query_map(params![pattern], Self::row_to_document)
            .map_err(|e| AppError::Internal(format!("Failed to search documents: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect documents: {}", e)))?;

        Ok(docs)
    }

    /// Rename a document (catalog only).
    pub fn rename_document(&self, id: i64, name: &str, extension: &str) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE documento SET nombre = ?1, extension = ?2, actualizado_en = ?3 WHERE id = ?4",
                params![name, extension, now_timestamp(), id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to rename document: {}", e)))?;
        Ok(rows > 0)
    }

    /// Update the mutable fields of a document.
    pub fn update_document(&self, doc: &Document) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE documento SET nombre = ?1, extension = ?2, tamano = ?3, activo = ?4,
                 actualizado_en = ?5 WHERE id = ?6",
                params![
                    doc.name,
                    doc.extension,
                    doc.size,
                    doc.active,
                    now_timestamp(),
                    doc.id
                ],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update document: {}", e)))?;
        Ok(rows > 0)
    }

    /// Set the active flag.
    pub fn set_document_active(&self, id: i64, active: bool) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE documento SET activo = ?1, actualizado_en = ?2 WHERE id = ?3",
                params![active, now_timestamp(), id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update document: {}", e)))?;
        Ok(rows > 0)
    }

    /// Delete a document; dependent rows cascade.
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute("DELETE FROM documento WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete document: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== METADATA OPERATIONS ==========

    /// Replace the metadata set of a document.
    pub fn set_metadata(&self, id: i64, metadata: &BTreeMap<String, String>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to begin transaction: {}", e)))?;

        tx.execute("DELETE FROM metadato WHERE documento_id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to clear metadata: {}", e)))?;
        for (key, value) in metadata {
            tx.execute(
                "INSERT INTO metadato (documento_id, clave, valor) VALUES (?1, ?2, ?3)",
                params![id, key, value],
            )
            .map_err(|e| AppError::Internal(format!("Failed to save metadata: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit metadata: {}", e)))
    }

    /// Get the metadata of a document.
    pub fn get_metadata(&self, id: i64) -> Result<BTreeMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT clave, valor FROM metadato WHERE documento_id = ?1 ORDER BY clave")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let entries = stmt
            .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| AppError::Internal(format!("Failed to get metadata: {}", e)))?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect metadata: {}", e)))?;

        Ok(entries)
    }

    /// Helper to convert a row to Document.
    fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        Ok(Document {
            id: row.get(0)?,
            name: row.get(1)?,
            extension: row.get(2)?,
            hash: row.get(3)?,
            size: row.get(4)?,
            active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

/// Escape LIKE wildcards so the term matches literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
