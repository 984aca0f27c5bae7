use crate::error::{AppError, Result};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

/// Tables carrying an `actualizado_en` column maintained by triggers.
const TIMESTAMPED_TABLES: [&str; 8] = [
    "documento",
    "bibliografia",
    "categoria",
    "grupo",
    "coleccion",
    "palabra_clave",
    "etiqueta",
    "progreso_lectura",
];

/// Catalog handle. Cloning shares the same connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Lock the connection.
    pub(super) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Make every document delete abort.
    #[cfg(test)]
    pub(crate) fn reject_document_deletes(&self) {
        self.conn()
            .execute_batch(
                "CREATE TRIGGER documento_sin_borrado BEFORE DELETE ON documento
                 BEGIN SELECT RAISE(ABORT, 'document deletes are disabled'); END;",
            )
            .unwrap();
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Documents (content hash is the dedup key)
            CREATE TABLE IF NOT EXISTS documento (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT NOT NULL,
                extension TEXT NOT NULL DEFAULT '',
                hash TEXT NOT NULL UNIQUE,
                tamano INTEGER NOT NULL DEFAULT 0,
                activo INTEGER NOT NULL DEFAULT 1,
                creado_en INTEGER NOT NULL,
                actualizado_en INTEGER NOT NULL
            );

            -- Extracted key/value metadata
            CREATE TABLE IF NOT EXISTS metadato (
                documento_id INTEGER NOT NULL,
                clave TEXT NOT NULL,
                valor TEXT NOT NULL,
                PRIMARY KEY (documento_id, clave),
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE
            );

            -- Bibliography (one per document)
            CREATE TABLE IF NOT EXISTS bibliografia (
                documento_id INTEGER PRIMARY KEY,
                titulo TEXT,
                autores TEXT,
                anio INTEGER,
                editorial TEXT,
                lugar TEXT,
                edicion TEXT,
                idioma TEXT,
                volumen TEXT,
                paginas INTEGER,
                isbn TEXT,
                actualizado_en INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE
            );

            -- Chapters
            CREATE TABLE IF NOT EXISTS capitulo (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                documento_id INTEGER NOT NULL,
                numero INTEGER NOT NULL,
                titulo TEXT NOT NULL,
                pagina_inicio INTEGER,
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE
            );

            -- Sections (tree rooted at a chapter)
            CREATE TABLE IF NOT EXISTS seccion (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                capitulo_id INTEGER NOT NULL,
                titulo TEXT NOT NULL,
                nivel TEXT NOT NULL DEFAULT '',
                seccion_padre_id INTEGER,
                pagina INTEGER,
                FOREIGN KEY (capitulo_id) REFERENCES capitulo(id) ON DELETE CASCADE,
                FOREIGN KEY (seccion_padre_id) REFERENCES seccion(id) ON DELETE CASCADE
            );

            -- Favorites (row existence = favorite)
            CREATE TABLE IF NOT EXISTS favorito (
                documento_id INTEGER PRIMARY KEY,
                creado_en INTEGER NOT NULL,
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE
            );

            -- Reading progress
            CREATE TABLE IF NOT EXISTS progreso_lectura (
                documento_id INTEGER PRIMARY KEY,
                pagina_actual INTEGER NOT NULL DEFAULT 0,
                paginas_totales INTEGER,
                actualizado_en INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE
            );

            -- Categories (self-referencing tree)
            CREATE TABLE IF NOT EXISTS categoria (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                categoria_padre_id INTEGER,
                nombre TEXT NOT NULL UNIQUE,
                descripcion TEXT,
                actualizado_en INTEGER NOT NULL DEFAULT 0,
                CHECK (categoria_padre_id IS NULL OR categoria_padre_id <> id),
                FOREIGN KEY (categoria_padre_id) REFERENCES categoria(id) ON DELETE CASCADE
            );

            -- Flat taxonomies
            CREATE TABLE IF NOT EXISTS grupo (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT NOT NULL UNIQUE,
                descripcion TEXT,
                actualizado_en INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS coleccion (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT NOT NULL UNIQUE,
                descripcion TEXT,
                actualizado_en INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS palabra_clave (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT NOT NULL UNIQUE,
                descripcion TEXT,
                actualizado_en INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS etiqueta (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nombre TEXT NOT NULL UNIQUE,
                descripcion TEXT,
                actualizado_en INTEGER NOT NULL DEFAULT 0
            );

            -- Junction tables
            CREATE TABLE IF NOT EXISTS documento_categoria (
                documento_id INTEGER NOT NULL,
                categoria_id INTEGER NOT NULL,
                PRIMARY KEY (documento_id, categoria_id),
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE,
                FOREIGN KEY (categoria_id) REFERENCES categoria(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS documento_grupo (
                documento_id INTEGER NOT NULL,
                grupo_id INTEGER NOT NULL,
                PRIMARY KEY (documento_id, grupo_id),
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE,
                FOREIGN KEY (grupo_id) REFERENCES grupo(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS documento_coleccion (
                documento_id INTEGER NOT NULL,
                coleccion_id INTEGER NOT NULL,
                PRIMARY KEY (documento_id, coleccion_id),
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE,
                FOREIGN KEY (coleccion_id) REFERENCES coleccion(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS documento_palabra_clave (
                documento_id INTEGER NOT NULL,
                palabra_clave_id INTEGER NOT NULL,
                PRIMARY KEY (documento_id, palabra_clave_id),
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE,
                FOREIGN KEY (palabra_clave_id) REFERENCES palabra_clave(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS documento_etiqueta (
                documento_id INTEGER NOT NULL,
                etiqueta_id INTEGER NOT NULL,
                PRIMARY KEY (documento_id, etiqueta_id),
                FOREIGN KEY (documento_id) REFERENCES documento(id) ON DELETE CASCADE,
                FOREIGN KEY (etiqueta_id) REFERENCES etiqueta(id) ON DELETE CASCADE
            );

            -- Membership flags per document
            CREATE VIEW IF NOT EXISTS vista_documento_taxonomia AS
            SELECT d.id AS documento_id,
                   EXISTS (SELECT 1 FROM documento_coleccion x WHERE x.documento_id = d.id) AS en_coleccion,
                   EXISTS (SELECT 1 FROM documento_grupo x WHERE x.documento_id = d.id) AS en_grupo,
                   EXISTS (SELECT 1 FROM documento_etiqueta x WHERE x.documento_id = d.id) AS con_etiqueta,
                   EXISTS (SELECT 1 FROM documento_palabra_clave x WHERE x.documento_id = d.id) AS con_palabra_clave,
                   EXISTS (SELECT 1 FROM documento_categoria x WHERE x.documento_id = d.id) AS en_categoria,
                   EXISTS (SELECT 1 FROM favorito x WHERE x.documento_id = d.id) AS favorito
            FROM documento d;

            -- Document summary joined with bibliography and favorite flag
            CREATE VIEW IF NOT EXISTS vista_documento_resumen AS
            SELECT d.id AS documento_id, d.nombre, d.extension, d.activo,
                   b.titulo, b.autores, b.anio, b.editorial, b.isbn,
                   (f.documento_id IS NOT NULL) AS favorito
            FROM documento d
            LEFT JOIN bibliografia b ON b.documento_id = d.id
            LEFT JOIN favorito f ON f.documento_id = d.id;

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_documento_nombre ON documento(nombre);
            CREATE INDEX IF NOT EXISTS idx_capitulo_documento ON capitulo(documento_id, numero);
            CREATE INDEX IF NOT EXISTS idx_seccion_capitulo ON seccion(capitulo_id);
            CREATE INDEX IF NOT EXISTS idx_categoria_padre ON categoria(categoria_padre_id);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        for table in TIMESTAMPED_TABLES {
            conn.execute_batch(&format!(
                "CREATE TRIGGER IF NOT EXISTS trg_{table}_actualizado
                 AFTER UPDATE ON {table}
                 FOR EACH ROW WHEN NEW.actualizado_en = OLD.actualizado_en
                 BEGIN
                     UPDATE {table} SET actualizado_en = CAST(strftime('%s', 'now') AS INTEGER)
                     WHERE rowid = NEW.rowid;
                 END;"
            ))
            .map_err(|e| AppError::Internal(format!("Failed to create trigger on {}: {}", table, e)))?;
        }

        Ok(())
    }
}

/// Whether a SQLite error is a UNIQUE constraint violation.
pub(super) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    e.to_string().contains("UNIQUE constraint")
}
