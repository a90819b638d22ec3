//! SQLite database for status records and JSON documents
//!
//! A single connection guarded by a mutex; every statement runs to completion
//! under the lock, which makes status read-modify-write updates atomic.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use super::{DocumentStore, StatusStore, MAX_BATCH_WRITE};
use crate::error::{Error, Result};
use crate::types::{StatusRecord, StatusUpdate};

/// SQLite-backed status and document store
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

impl PipelineDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )
        .map_err(|e| Error::database(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            -- One row per processing run
            CREATE TABLE IF NOT EXISTS processing_status (
                id TEXT PRIMARY KEY,
                resume_id TEXT,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_processing_status_resume ON processing_status(resume_id);

            -- Generic JSON documents
            CREATE TABLE IF NOT EXISTS documents (
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tbl, id)
            );
            "#,
        )
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

        Ok(())
    }

    fn write_status(conn: &Connection, record: &StatusRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        conn.execute(
            r#"
            INSERT INTO processing_status (id, resume_id, status, record, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                resume_id = excluded.resume_id,
                status = excluded.status,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
            params![
                record.id,
                record.resume_id,
                record.status.as_str(),
                json,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn read_status(conn: &Connection, id: &str) -> Result<Option<StatusRecord>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT record FROM processing_status WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| {
            serde_json::from_str(&j)
                .map_err(|e| Error::database(format!("Corrupt status record '{}': {}", id, e)))
        })
        .transpose()
    }

    fn write_document(conn: &Connection, table: &str, id: &str, item: &Value) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO documents (tbl, id, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(tbl, id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            params![table, id, serde_json::to_string(item)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn read_document(conn: &Connection, table: &str, id: &str) -> Result<Option<Value>> {
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE tbl = ?1 AND id = ?2",
                params![table, id],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| {
            serde_json::from_str(&b)
                .map_err(|e| Error::database(format!("Corrupt document {}/{}: {}", table, id, e)))
        })
        .transpose()
    }
}

#[async_trait]
impl StatusStore for PipelineDb {
    async fn create(&self, record: StatusRecord) -> Result<()> {
        let conn = self.conn.lock();
        Self::write_status(&conn, &record)
    }

    async fn update(&self, id: &str, update: StatusUpdate) -> Result<bool> {
        let conn = self.conn.lock();
        let mut record = Self::read_status(&conn, id)?.unwrap_or_else(|| StatusRecord::empty(id));

        let target = update.status;
        if !record.apply(update) {
            tracing::debug!(
                processing_id = %id,
                current = %record.status,
                target = %target,
                "Ignoring status write that would move the run backwards"
            );
            return Ok(false);
        }

        Self::write_status(&conn, &record)?;
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<StatusRecord>> {
        let conn = self.conn.lock();
        Self::read_status(&conn, id)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[async_trait]
impl DocumentStore for PipelineDb {
    async fn put_item(&self, table: &str, id: &str, item: Value) -> Result<()> {
        let conn = self.conn.lock();
        Self::write_document(&conn, table, id, &item)
    }

    async fn get_item(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        Self::read_document(&conn, table, id)
    }

    async fn update_item(&self, table: &str, id: &str, fields: Map<String, Value>) -> Result<()> {
        let conn = self.conn.lock();
        let mut item = match Self::read_document(&conn, table, id)? {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(Error::storage(format!(
                    "Document {}/{} is not an object",
                    table, id
                )))
            }
            None => Map::new(),
        };
        for (key, value) in fields {
            item.insert(key, value);
        }
        Self::write_document(&conn, table, id, &Value::Object(item))
    }

    async fn batch_write(&self, table: &str, items: Vec<(String, Value)>) -> Result<()> {
        if items.len() > MAX_BATCH_WRITE {
            return Err(Error::storage(format!(
                "Batch of {} items exceeds the limit of {}",
                items.len(),
                MAX_BATCH_WRITE
            )));
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (id, item) in &items {
            Self::write_document(&tx, table, id, item)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn query_by_field(&self, table: &str, field: &str, value: &str) -> Result<Vec<Value>> {
        if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::storage(format!("Invalid query field '{}'", field)));
        }
        let path = format!("$.{}", field);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM documents WHERE tbl = ?1 AND json_extract(body, ?2) = ?3",
        )?;
        let bodies = stmt
            .query_map(params![table, path, value], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(Error::from))
            .collect()
    }
}
