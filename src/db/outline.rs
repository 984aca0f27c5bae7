use crate::db::{Chapter, Database, Section};
use crate::error::{AppError, Result};
use rusqlite::params;

impl Database {
    // ========== CHAPTER OPERATIONS ==========

    /// Add a chapter to a document.
    pub fn add_chapter(
        &self,
        document_id: i64,
        number: i64,
        title: &str,
        start_page: Option<i64>,
    ) -> Result<Chapter> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO capitulo (documento_id, numero, titulo, pagina_inicio)
             VALUES (?1, ?2, ?3, ?4)",
            params![document_id, number, title, start_page],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add chapter: {}", e)))?;

        Ok(Chapter {
            id: conn.last_insert_rowid(),
            document_id,
            number,
            title: title.to_string(),
            start_page,
        })
    }

    /// Chapters of a document ordered by chapter number.
    pub fn list_chapters(&self, document_id: i64) -> Result<Vec<Chapter>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, documento_id, numero, titulo, pagina_inicio
                 FROM capitulo WHERE documento_id = ?1
                 ORDER BY numero, id",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let chapters = stmt
            .query_map(params![document_id], |row| {
                Ok(Chapter {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    number: row.get(2)?,
                    title: row.get(3)?,
                    start_page: row.get(4)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list chapters: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect chapters: {}", e)))?;

        Ok(chapters)
    }

    /// Delete a chapter and its sections.
    pub fn delete_chapter(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute("DELETE FROM capitulo WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete chapter: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== SECTION OPERATIONS ==========

    /// Add a section under a chapter, optionally nested under another section.
    pub fn add_section(
        &self,
        chapter_id: i64,
        title: &str,
        level: &str,
        parent_id: Option<i64>,
        page: Option<i64>,
    ) -> Result<Section> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO seccion (capitulo_id, titulo, nivel, seccion_padre_id, pagina)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chapter_id, title, level, parent_id, page],
        )
        .map_err(|e| AppError::Internal(format!("Failed to add section: {}", e)))?;

        Ok(Section {
            id: conn.last_insert_rowid(),
            chapter_id,
            title: title.to_string(),
            level: level.to_string(),
            parent_id,
            page,
        })
    }

    /// Sections of a chapter in insertion order.
    pub fn list_sections(&self, chapter_id: i64) -> Result<Vec<Section>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, capitulo_id, titulo, nivel, seccion_padre_id, pagina
                 FROM seccion WHERE capitulo_id = ?1 ORDER BY id",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let sections = stmt
            .query_map(params![chapter_id], |row| {
                Ok(Section {
                    id: row.get(0)?,
                    chapter_id: row.get(1)?,
                    title: row.get(2)?,
                    level: row.get(3)?,
                    parent_id: row.get(4)?,
                    page: row.get(5)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list sections: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect sections: {}", e)))?;

        Ok(sections)
    }
}
