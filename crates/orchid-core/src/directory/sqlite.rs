//! SQLite-backed capability directory.
//!
//! Uses rusqlite with WAL mode for concurrent read performance. All
//! database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{CapabilityDirectory, CapabilityRecord};
use crate::error::EngineError;

/// Thread-safe handle to the directory database.
#[derive(Clone)]
pub struct SqliteDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDirectory {
    /// Open (or create) the directory database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Directory(format!("failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Directory(format!("failed to set pragmas: {}", e)))?;

        let directory = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        directory.initialize_tables()?;

        tracing::info!("[Directory] SQLite database opened at: {}", db_path.display());
        Ok(directory)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Directory(format!("failed to open in-memory db: {}", e)))?;

        let directory = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        directory.initialize_tables()?;
        Ok(directory)
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Directory(format!("lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| EngineError::Directory(e.to_string()))
    }

    async fn with_conn_async<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let directory = self.clone();
        tokio::task::spawn_blocking(move || directory.with_conn(f))
            .await
            .map_err(|e| EngineError::Directory(format!("task join error: {}", e)))?
    }

    fn initialize_tables(&self) -> Result<(), EngineError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS capabilities (
                    capability      TEXT PRIMARY KEY,
                    provider        TEXT NOT NULL,
                    confidence      REAL NOT NULL DEFAULT 1.0,
                    auto_generated  INTEGER NOT NULL DEFAULT 0,
                    registered_at   TEXT NOT NULL,
                    last_used_at    TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_capabilities_auto
                    ON capabilities(auto_generated);
                ",
            )
        })
    }
}

#[async_trait]
impl CapabilityDirectory for SqliteDirectory {
    async fn resolve(&self, capability: &str) -> Result<Option<CapabilityRecord>, EngineError> {
        let capability = capability.to_string();
        self.with_conn_async(move |conn| {
            conn.query_row(
                "SELECT capability, provider, confidence, auto_generated, registered_at, last_used_at \
                 FROM capabilities WHERE capability = ?1",
                rusqlite::params![capability],
                |row| Ok(row_to_record(row)),
            )
            .optional()
        })
        .await
    }

    async fn register(&self, record: CapabilityRecord) -> Result<(), EngineError> {
        self.with_conn_async(move |conn| {
            conn.execute(
                "INSERT INTO capabilities (capability, provider, confidence, auto_generated, registered_at, last_used_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(capability) DO UPDATE SET \
                 provider=excluded.provider, confidence=excluded.confidence, \
                 auto_generated=excluded.auto_generated, registered_at=excluded.registered_at, \
                 last_used_at=excluded.last_used_at",
                rusqlite::params![
                    record.capability,
                    record.provider,
                    record.confidence,
                    record.auto_generated as i64,
                    record.registered_at,
                    record.last_used_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn touch(&self, capability: &str) -> Result<(), EngineError> {
        let capability = capability.to_string();
        let now = Utc::now().to_rfc3339();
        self.with_conn_async(move |conn| {
            conn.execute(
                "UPDATE capabilities SET last_used_at = ?2 WHERE capability = ?1",
                rusqlite::params![capability, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<CapabilityRecord>, EngineError> {
        self.with_conn_async(|conn| {
            let mut stmt = conn.prepare(
                "SELECT capability, provider, confidence, auto_generated, registered_at, last_used_at \
                 FROM capabilities ORDER BY capability",
            )?;
            let rows = stmt
                .query_map([], |row| Ok(row_to_record(row)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> CapabilityRecord {
    CapabilityRecord {
        capability: row.get(0).unwrap_or_default(),
        provider: row.get(1).unwrap_or_default(),
        confidence: row.get(2).unwrap_or(1.0),
        auto_generated: row.get::<_, i64>(3).unwrap_or(0) != 0,
        registered_at: row.get(4).unwrap_or_default(),
        last_used_at: row.get(5).unwrap_or(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_records_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("capabilities.db");

        {
            let directory = SqliteDirectory::open(&db_path).unwrap();
            directory
                .register(CapabilityRecord::generated(
                    "text.summarize",
                    "/modules/text.yaml",
                ))
                .await
                .unwrap();
        }

        let directory = SqliteDirectory::open(&db_path).unwrap();
        let record = directory.resolve("text.summarize").await.unwrap().unwrap();
        assert_eq!(record.provider, "/modules/text.yaml");
        assert!(record.auto_generated);
        assert!((record.confidence - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn register_is_an_upsert() {
        let directory = SqliteDirectory::open_in_memory().unwrap();
        directory
            .register(CapabilityRecord::new("util.echo", "builtin"))
            .await
            .unwrap();
        directory
            .register(CapabilityRecord::generated("util.echo", "/m/util.yaml"))
            .await
            .unwrap();

        let records = directory.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provider, "/m/util.yaml");
    }

    #[tokio::test]
    async fn touch_updates_last_used() {
        let directory = SqliteDirectory::open_in_memory().unwrap();
        directory
            .register(CapabilityRecord::new("log.info", "builtin"))
            .await
            .unwrap();
        directory.touch("log.info").await.unwrap();
        let record = directory.resolve("log.info").await.unwrap().unwrap();
        assert!(record.last_used_at.is_some());
    }
}
