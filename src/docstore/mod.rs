//! Ingestion ledger - rusqlite-backed record of what has been ingested
//!
//! The vectors live in the vector store; this ledger remembers which source
//! produced which document id, the text hash at ingestion time and where the
//! nodes went. Location: `<data dir>/docstore.db`

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;

/// Ledger file name inside the data directory
pub const DOCSTORE_FILE: &str = "docstore.db";

const SELECT_COLUMNS: &str =
    "SELECT doc_id, source, file_name, hash, node_count, store, collection, ingested_at FROM documents";

// ============================================================================
// Types
// ============================================================================

/// One ingested document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocRecord {
    pub doc_id: String,
    /// File path (plus `#page=N`) or URL
    pub source: String,
    pub file_name: Option<String>,
    /// SHA-256 of the document text
    pub hash: String,
    pub node_count: usize,
    /// Vector store backend (`lance`, `mongo`)
    pub store: String,
    /// Table or collection inside the backend
    pub collection: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocStoreStats {
    pub document_count: usize,
    pub node_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// DocStore
// ============================================================================

pub struct DocStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocStore {
    /// Open the ledger (created when missing)
    ///
    /// # Arguments
    /// * `path` - SQLite file path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// Open `docstore.db` inside a data directory
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join(DOCSTORE_FILE))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                file_name TEXT,
                hash TEXT NOT NULL,
                node_count INTEGER NOT NULL,
                store TEXT NOT NULL,
                collection TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                UNIQUE(source, store, collection)
            )",
            [],
        )
        .context("Failed to create documents table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_ingested_at ON documents(ingested_at)",
            [],
        )
        .context("Failed to create ingested_at index")?;

        tracing::debug!("Docstore initialized at {:?}", self.db_path);
        Ok(())
    }

    /// Insert a record, replacing the previous one for the same source
    /// in the same store/collection
    pub fn upsert(&self, record: &DocRecord) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT INTO documents
                (doc_id, source, file_name, hash, node_count, store, collection, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(source, store, collection) DO UPDATE SET
                doc_id = excluded.doc_id,
                file_name = excluded.file_name,
                hash = excluded.hash,
                node_count = excluded.node_count,
                ingested_at = excluded.ingested_at",
            params![
                record.doc_id,
                record.source,
                record.file_name,
                record.hash,
                record.node_count as i64,
                record.store,
                record.collection,
                record.ingested_at.to_rfc3339(),
            ],
        )
        .context("Failed to upsert document record")?;

        tracing::debug!("Recorded {} ({} nodes)", record.source, record.node_count);
        Ok(())
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<DocRecord>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let sql = format!("{} WHERE doc_id = ?1", SELECT_COLUMNS);
        conn.query_row(&sql, params![doc_id], row_to_record)
            .optional()
            .context("Failed to read document record")
    }

    /// Latest record of a source in a given store/collection
    pub fn get_by_source(
        &self,
        source: &str,
        store: &str,
        collection: &str,
    ) -> Result<Option<DocRecord>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let sql = format!(
            "{} WHERE source = ?1 AND store = ?2 AND collection = ?3",
            SELECT_COLUMNS
        );
        conn.query_row(&sql, params![source, store, collection], row_to_record)
            .optional()
            .context("Failed to read document record")
    }

    /// Most recently ingested first
    pub fn list(&self, limit: usize) -> Result<Vec<DocRecord>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let sql = format!("{} ORDER BY ingested_at DESC, source ASC LIMIT ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(params![limit as i64], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list document records")?;

        Ok(records)
    }

    pub fn delete(&self, doc_id: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let rows = conn
            .execute("DELETE FROM documents WHERE doc_id = ?1", params![doc_id])
            .context("Failed to delete document record")?;

        Ok(rows > 0)
    }

    pub fn stats(&self) -> Result<DocStoreStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let (documents, nodes): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(node_count), 0) FROM documents",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to read docstore stats")?;

        Ok(DocStoreStats {
            document_count: documents as usize,
            node_count: nodes as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DocRecord> {
    Ok(DocRecord {
        doc_id: row.get(0)?,
        source: row.get(1)?,
        file_name: row.get(2)?,
        hash: row.get(3)?,
        node_count: row.get::<_, i64>(4)? as usize,
        store: row.get(5)?,
        collection: row.get(6)?,
        ingested_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// RFC3339 -> DateTime<Utc>; unparsable values become the Unix epoch
fn parse_datetime(s: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(e) => {
            tracing::warn!("Invalid ingested_at timestamp {:?}: {}", s, e);
            DateTime::<Utc>::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
