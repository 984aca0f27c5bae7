use crate::db::{Bibliography, Database, ReadingProgress, now_timestamp};
use crate::error::{AppError, Result};
use rusqlite::{OptionalExtension, params};

impl Database {
    // ========== BIBLIOGRAPHY OPERATIONS ==========

    /// Save or update the bibliography of a document.
    pub fn save_bibliography(&self, bib: &Bibliography) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO bibliografia
             (documento_id, titulo, autores, anio, editorial, lugar, edicion, idioma,
              volumen, paginas, isbn, actualizado_en)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (documento_id) DO UPDATE SET
                titulo = excluded.titulo,
                autores = excluded.autores,
                anio = excluded.anio,
                editorial = excluded.editorial,
                lugar = excluded.lugar,
                edicion = excluded.edicion,
                idioma = excluded.idioma,
                volumen = excluded.volumen,
                paginas = excluded.paginas,
                isbn = excluded.isbn,
                actualizado_en = excluded.actualizado_en",
            params![
                bib.document_id,
                bib.title,
                bib.authors,
                bib.year,
                bib.publisher,
                bib.place,
                bib.edition,
                bib.language,
                bib.volume,
                bib.pages,
                bib.isbn,
                now_timestamp(),
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save bibliography: {}", e)))?;
        Ok(())
    }

    /// Get the bibliography of a document.
    pub fn get_bibliography(&self, document_id: i64) -> Result<Option<Bibliography>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT documento_id, titulo, autores, anio, editorial, lugar, edicion, idioma,
                    volumen, paginas, isbn
             FROM bibliografia WHERE documento_id = ?1",
            params![document_id],
            |row| {
                Ok(Bibliography {
                    document_id: row.get(0)?,
                    title: row.get(1)?,
                    authors: row.get(2)?,
                    year: row.get(3)?,
                    publisher: row.get(4)?,
                    place: row.get(5)?,
                    edition: row.get(6)?,
                    language: row.get(7)?,
                    volume: row.get(8)?,
                    pages: row.get(9)?,
                    isbn: row.get(10)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get bibliography: {}", e)))
    }

    // ========== FAVORITE OPERATIONS ==========

    /// Mark or unmark a document as favorite. Returns whether anything changed.
    pub fn set_favorite(&self, document_id: i64, favorite: bool) -> Result<bool> {
        let conn = self.conn();
        let rows = if favorite {
            conn.execute(
                "INSERT OR IGNORE INTO favorito (documento_id, creado_en) VALUES (?1, ?2)",
                params![document_id, now_timestamp()],
            )
        } else {
            conn.execute(
                "DELETE FROM favorito WHERE documento_id = ?1",
                params![document_id],
            )
        }
        .map_err(|e| AppError::Internal(format!("Failed to update favorite: {}", e)))?;
        Ok(rows > 0)
    }

    /// Whether a document is a favorite.
    pub fn is_favorite(&self, document_id: i64) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM favorito WHERE documento_id = ?1)",
            params![document_id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to check favorite: {}", e)))
    }

    /// IDs of favorite documents, most recent first.
    pub fn list_favorites(&self) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT documento_id FROM favorito ORDER BY creado_en DESC, documento_id")
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to list favorites: {}", e)))?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect favorites: {}", e)))?;

        Ok(ids)
    }

    // ========== PROGRESS OPERATIONS ==========

    /// Save or update reading progress.
    pub fn save_progress(
        &self,
        document_id: i64,
        current_page: i64,
        total_pages: Option<i64>,
    ) -> Result<ReadingProgress> {
        let conn = self.conn();
        let now = now_timestamp();
        conn.execute(
            "INSERT INTO progreso_lectura (documento_id, pagina_actual, paginas_totales, actualizado_en)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (documento_id) DO UPDATE SET
                pagina_actual = excluded.pagina_actual,
                paginas_totales = COALESCE(excluded.paginas_totales, progreso_lectura.paginas_totales),
                actualizado_en = excluded.actualizado_en",
            params![document_id, current_page.max(0), total_pages, now],
        )
        .map_err(|e| AppError::Internal(format!("Failed to save progress: {}", e)))?;

        conn.query_row(
            "SELECT documento_id, pagina_actual, paginas_totales, actualizado_en
             FROM progreso_lectura WHERE documento_id = ?1",
            params![document_id],
            Self::row_to_progress,
        )
        .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))
    }

    /// Get reading progress for a document.
    pub fn get_progress(&self, document_id: i64) -> Result<Option<ReadingProgress>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT documento_id, pagina_actual, paginas_totales, actualizado_en
             FROM progreso_lectura WHERE documento_id = ?1",
            params![document_id],
            Self::row_to_progress,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get progress: {}", e)))
    }

    fn row_to_progress(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReadingProgress> {
        Ok(ReadingProgress {
            document_id: row.get(0)?,
            current_page: row.get(1)?,
            total_pages: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }
}
