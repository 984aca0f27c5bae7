use super::schema::is_unique_violation;
use crate::db::{Category, Database, TaxonomyFlags, TaxonomyKind, Taxon, now_timestamp};
use crate::error::{AppError, Result};
use rusqlite::{OptionalExtension, params};
use std::collections::HashSet;

impl Database {
    // ========== CATEGORY OPERATIONS ==========

    /// Create a category.
    pub fn create_category(
        &self,
        name: &str,
        parent_id: Option<i64>,
        description: Option<&str>,
    ) -> Result<Category> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO categoria (categoria_padre_id, nombre, descripcion, actualizado_en)
             VALUES (?1, ?2, ?3, ?4)",
            params![parent_id, name, description, now_timestamp()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Constraint(format!("Category '{}' already exists", name))
            } else {
                AppError::Internal(format!("Failed to create category: {}", e))
            }
        })?;

        Ok(Category {
            id: conn.last_insert_rowid(),
            parent_id,
            name: name.to_string(),
            description: description.map(String::from),
        })
    }

    /// Get category by ID.
    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, categoria_padre_id, nombre, descripcion FROM categoria WHERE id = ?1",
            params![id],
            Self::row_to_category,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get category: {}", e)))
    }

    /// List all categories ordered by name.
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, categoria_padre_id, nombre, descripcion
                 FROM categoria ORDER BY nombre COLLATE NOCASE",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let categories = stmt
            .query_map([], Self::row_to_category)
            .map_err(|e| AppError::Internal(format!("Failed to list categories: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect categories: {}", e)))?;

        Ok(categories)
    }

    /// Direct children of a category (roots when `parent_id` is `None`), ordered by name.
    pub fn child_categories(&self, parent_id: Option<i64>) -> Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, categoria_padre_id, nombre, descripcion
                 FROM categoria WHERE categoria_padre_id IS ?1
                 ORDER BY nombre COLLATE NOCASE",
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let categories = stmt
            .query_map(params![parent_id], Self::row_to_category)
            .map_err(|e| AppError::Internal(format!("Failed to list categories: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect categories: {}", e)))?;

        Ok(categories)
    }

    /// Update a category. Rejects a category being its own parent.
    pub fn update_category(&self, category: &Category) -> Result<bool> {
        if category.parent_id == Some(category.id) {
            return Err(AppError::Constraint(format!(
                "Category '{}' cannot be its own parent",
                category.name
            )));
        }

        let conn = self.conn();
        let rows = conn
            .execute(
                "UPDATE categoria SET categoria_padre_id = ?1, nombre = ?2, descripcion = ?3
                 WHERE id = ?4",
                params![
                    category.parent_id,
                    category.name,
                    category.description,
                    category.id
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Constraint(format!("Category '{}' already exists", category.name))
                } else {
                    AppError::Internal(format!("Failed to update category: {}", e))
                }
            })?;
        Ok(rows > 0)
    }

    /// Delete a category row. Child rules are enforced by the category tree engine.
    pub fn delete_category(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute("DELETE FROM categoria WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete category: {}", e)))?;
        Ok(rows > 0)
    }

    /// Number of categories whose parent is `id`.
    pub fn count_child_categories(&self, id: i64) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM categoria WHERE categoria_padre_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count categories: {}", e)))
    }

    fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
        Ok(Category {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
        })
    }

    // ========== FLAT TAXONOMY OPERATIONS ==========

    /// Create an entry in a flat taxonomy.
    pub fn create_taxon(
        &self,
        kind: TaxonomyKind,
        name: &str,
        description: Option<&str>,
    ) -> Result<Taxon> {
        if kind.is_hierarchical() {
            return Err(AppError::InvalidFormat(
                "Categories are created through the category tree".to_string(),
            ));
        }

        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO {} (nombre, descripcion, actualizado_en) VALUES (?1, ?2, ?3)",
                kind.table()
            ),
            params![name, description, now_timestamp()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Constraint(format!("{} '{}' already exists", kind, name))
            } else {
                AppError::Internal(format!("Failed to create {}: {}", kind, e))
            }
        })?;

        Ok(Taxon {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(String::from),
        })
    }

    /// List the entries of a flat taxonomy ordered by name.
    pub fn list_taxa(&self, kind: TaxonomyKind) -> Result<Vec<Taxon>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, nombre, descripcion FROM {} ORDER BY nombre COLLATE NOCASE",
                kind.table()
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let taxa = stmt
            .query_map([], |row| {
                Ok(Taxon {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to list {}: {}", kind, e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect {}: {}", kind, e)))?;

        Ok(taxa)
    }

    /// Rename an entry of a flat taxonomy.
    pub fn rename_taxon(&self, kind: TaxonomyKind, id: i64, name: &str) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                &format!("UPDATE {} SET nombre = ?1 WHERE id = ?2", kind.table()),
                params![name, id],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Constraint(format!("{} '{}' already exists", kind, name))
                } else {
                    AppError::Internal(format!("Failed to rename {}: {}", kind, e))
                }
            })?;
        Ok(rows > 0)
    }

    /// Delete an entry of a flat taxonomy; memberships cascade.
    pub fn delete_taxon(&self, kind: TaxonomyKind, id: i64) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
                params![id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to delete {}: {}", kind, e)))?;
        Ok(rows > 0)
    }

    // ========== MEMBERSHIP OPERATIONS ==========

    /// Add a document to a taxonomy entry. Returns false if already a member.
    pub fn add_membership(&self, kind: TaxonomyKind, document_id: i64, taxon_id: i64) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (documento_id, {}) VALUES (?1, ?2)",
                    kind.junction(),
                    kind.key_column()
                ),
                params![document_id, taxon_id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to add {} membership: {}", kind, e)))?;
        Ok(rows > 0)
    }

    /// Remove a document from a taxonomy entry.
    pub fn remove_membership(
        &self,
        kind: TaxonomyKind,
        document_id: i64,
        taxon_id: i64,
    ) -> Result<bool> {
        let conn = self.conn();
        let rows = conn
            .execute(
                &format!(
                    "DELETE FROM {} WHERE documento_id = ?1 AND {} = ?2",
                    kind.junction(),
                    kind.key_column()
                ),
                params![document_id, taxon_id],
            )
            .map_err(|e| {
                AppError::Internal(format!("Failed to remove {} membership: {}", kind, e))
            })?;
        Ok(rows > 0)
    }

    /// All document IDs belonging to a taxonomy entry.
    pub fn members_of(&self, kind: TaxonomyKind, taxon_id: i64) -> Result<HashSet<i64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT documento_id FROM {} WHERE {} = ?1",
                kind.junction(),
                kind.key_column()
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let members = stmt
            .query_map(params![taxon_id], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to get {} members: {}", kind, e)))?
            .collect::<std::result::Result<HashSet<i64>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect members: {}", e)))?;

        Ok(members)
    }

    /// Taxonomy entries a document belongs to.
    pub fn memberships_of(&self, kind: TaxonomyKind, document_id: i64) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM {} WHERE documento_id = ?1 ORDER BY 1",
                kind.key_column(),
                kind.junction()
            ))
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let ids = stmt
            .query_map(params![document_id], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to get memberships: {}", e)))?
            .collect::<std::result::Result<Vec<i64>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect memberships: {}", e)))?;

        Ok(ids)
    }

    /// Membership flags of a document.
    pub fn taxonomy_flags(&self, document_id: i64) -> Result<Option<TaxonomyFlags>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT documento_id, en_coleccion, en_grupo, con_etiqueta, con_palabra_clave,
                    en_categoria, favorito
             FROM vista_documento_taxonomia WHERE documento_id = ?1",
            params![document_id],
            |row| {
                Ok(TaxonomyFlags {
                    document_id: row.get(0)?,
                    in_collection: row.get(1)?,
                    in_group: row.get(2)?,
                    tagged: row.get(3)?,
                    has_keywords: row.get(4)?,
                    in_category: row.get(5)?,
                    favorite: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get taxonomy flags: {}", e)))
    }
}
