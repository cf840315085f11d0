//! SQLite exchange log store
//!
//! One row per exchange in `proxy_logs`. The database runs in WAL mode so
//! `model-relay logs` can read while the relay is writing.

use super::{LogRecord, RecordStore, StreamOutcome};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;

const SCHEMA_VERSION: i32 = 1;

pub struct SqliteStore {
    conn: Connection,
    retention_days: u32,
}

impl SqliteStore {
    /// Open (or create) the database and apply migrations
    pub fn open(db_path: &Path, retention_days: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn,
            retention_days,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            "#,
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(
                    (SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'),
                    0
                )",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::apply_schema_v1(conn)?;
        }

        Ok(())
    }

    fn apply_schema_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS proxy_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_url TEXT NOT NULL,
                request_method TEXT NOT NULL,
                request_time INTEGER NOT NULL,       -- ms since epoch
                response_duration_ms INTEGER NOT NULL,
                status_code INTEGER NOT NULL,
                request_body TEXT NOT NULL,
                response_headers TEXT NOT NULL,      -- JSON object
                response_content BLOB NOT NULL,
                outcome TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_proxy_logs_time ON proxy_logs(request_time);
            "#,
        )?;

        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        tracing::debug!(version = SCHEMA_VERSION, "Applied exchange log schema");
        Ok(())
    }

    fn insert(conn: &Connection, record: &LogRecord) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO proxy_logs (
                request_url, request_method, request_time, response_duration_ms,
                status_code, request_body, response_headers, response_content, outcome
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.request_url,
                record.request_method,
                record.request_time,
                record.response_duration_ms as i64,
                record.status_code,
                record.request_body,
                record.response_headers,
                record.response_content,
                record.outcome.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Delete rows older than the retention window; returns rows deleted
    pub fn run_retention_cleanup(&self) -> Result<u64> {
        if self.retention_days == 0 {
            return Ok(0);
        }

        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.retention_days as i64);
        let deleted = self.conn.execute(
            "DELETE FROM proxy_logs WHERE request_time < ?1",
            params![cutoff.timestamp_millis()],
        )?;

        Ok(deleted as u64)
    }
}

impl RecordStore for SqliteStore {
    fn write_batch(&mut self, batch: &[LogRecord]) -> Result<u64> {
        let tx = self.conn.transaction()?;
        let mut failed = 0u64;

        for record in batch {
            if let Err(e) = Self::insert(&tx, record) {
                // Best-effort: one bad row does not sink the batch
                failed += 1;
                tracing::warn!(url = %record.request_url, error = %e, "Failed to store exchange log");
            }
        }

        tx.commit()?;
        Ok(failed)
    }

    fn maintain(&mut self) -> Result<()> {
        if self.retention_days == 0 {
            tracing::trace!("Retention cleanup skipped (retention disabled)");
            return Ok(());
        }

        let deleted = self.run_retention_cleanup()?;
        tracing::info!(
            deleted,
            retention_days = self.retention_days,
            "Retention cleanup complete"
        );
        Ok(())
    }
}

/// Read the most recent records, newest first
pub fn recent(db_path: &Path, limit: usize) -> Result<Vec<LogRecord>> {
    // Read-write without CREATE: a missing database is an error, not a new file
    let conn = Connection::open_with_flags(db_path, OpenFlags::SQLITE_OPEN_READ_WRITE)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let mut stmt = conn.prepare(
        r#"
        SELECT request_url, request_method, request_time, response_duration_ms,
               status_code, request_body, response_headers, response_content, outcome
        FROM proxy_logs
        ORDER BY id DESC
        LIMIT ?1
        "#,
    )?;

    let rows = stmt.query_map(params![limit as i64], |row| {
        let duration: i64 = row.get(3)?;
        let outcome: String = row.get(8)?;
        Ok(LogRecord {
            request_url: row.get(0)?,
            request_method: row.get(1)?,
            request_time: row.get(2)?,
            response_duration_ms: duration.max(0) as u64,
            status_code: row.get(4)?,
            request_body: row.get(5)?,
            response_headers: row.get(6)?,
            response_content: row.get(7)?,
            outcome: StreamOutcome::parse(&outcome),
        })
    })?;

    let records = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read exchange logs")?;
    Ok(records)
}
