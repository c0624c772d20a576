//! SQLite database for OCR history

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use std::path::Path;
use tracing::info;

const SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS ocr_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    raw_text TEXT NOT NULL,
    refined_text TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_ocr_history_user ON ocr_history(user_id, id);
";

/// One stored scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrHistoryRecord {
    pub id: i64,
    pub user_id: i64,
    pub image_path: String,
    pub raw_text: String,
    pub refined_text: String,
    pub created_at: String,
}

fn row_to_record(row: &Row) -> rusqlite::Result<OcrHistoryRecord> {
    Ok(OcrHistoryRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        image_path: row.get("image_path")?,
        raw_text: row.get("raw_text")?,
        refined_text: row.get("refined_text")?,
        created_at: row.get("created_at")?,
    })
}

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {:?}", parent))?;
        }

        let conn = Connection::open(path).with_context(|| format!("Failed to open database {:?}", path))?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        info!("Database opened at {:?}", path);
        Ok(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("Failed to read user_version pragma")?;

        if version > SCHEMA_VERSION {
            bail!(
                "Database version ({}) is newer than supported schema ({})",
                version,
                SCHEMA_VERSION
            );
        }
        if version == SCHEMA_VERSION {
            return Ok(());
        }

        let tx = conn.transaction().context("Failed to open migration transaction")?;
        tx.execute_batch(SCHEMA_V1).context("Failed to create schema")?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)
            .context("Failed to update user_version pragma")?;
        tx.commit().context("Failed to commit schema")?;
        Ok(())
    }

    /// Connectivity check for the health endpoint
    pub fn ping(&self) -> Result<()> {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("Database ping failed")?;
        Ok(())
    }

    /// Store a processed scan, returning its row id
    pub fn insert_ocr_history(&self, user_id: i64, image_path: &str, raw_text: &str, refined_text: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ocr_history (user_id, image_path, raw_text, refined_text) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, image_path, raw_text, refined_text],
        )
        .context("Failed to insert OCR history")?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent scans for a user, newest first
    pub fn list_ocr_history(&self, user_id: i64, limit: usize) -> Result<Vec<OcrHistoryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, image_path, raw_text, refined_text, created_at
             FROM ocr_history
             WHERE user_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let records = stmt
            .query_map(params![user_id, limit as i64], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read OCR history")?;
        Ok(records)
    }
}
