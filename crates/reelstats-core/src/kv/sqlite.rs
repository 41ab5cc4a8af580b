//! SQLite-backed key-value store.
//!
//! Runtime defaults follow the projection database conventions:
//! - `journal_mode = WAL` so readers do not block the single writer
//! - `busy_timeout = 5s` to ride out transient lock failures
//! - every batch runs inside one transaction

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;

use super::{KvError, KvStore, WriteBatch, WriteOp};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Key-value store persisted in a single SQLite table.
#[derive(Debug)]
pub struct SqliteKv {
    conn: Connection,
}

impl SqliteKv {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened and configured.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        conn.execute_batch(SCHEMA_SQL)?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(Self { conn })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        raw.map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(KvError::from)
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), KvError> {
        let tx = self.conn.transaction()?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, value) => {
                    let text = serde_json::to_string(&value)?;
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, text],
                    )?;
                }
                WriteOp::Delete(key) => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SqliteKv) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let kv = SqliteKv::open(&dir.path().join("store.sqlite3")).expect("open store");
        (dir, kv)
    }

    #[test]
    fn open_sets_wal_and_busy_timeout() {
        let (_dir, kv) = temp_store();
        let journal_mode: String = kv
            .conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = kv
            .conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());
    }

    #[test]
    fn put_get_delete_round_trip() -> Result<(), KvError> {
        let (_dir, mut kv) = temp_store();
        let mut batch = WriteBatch::new();
        batch.put("metrics", json!({"users": {}})).put("purgeLock", json!(5));
        kv.apply(batch)?;
        assert_eq!(kv.get("metrics")?, Some(json!({"users": {}})));

        let mut batch = WriteBatch::new();
        batch.delete("purgeLock").put("metrics", json!({"users": {"unknown": {}}}));
        kv.apply(batch)?;
        assert_eq!(kv.get("purgeLock")?, None);
        assert_eq!(kv.get("metrics")?, Some(json!({"users": {"unknown": {}}})));
        Ok(())
    }

    #[test]
    fn prefix_scan_ignores_like_wildcards() -> Result<(), KvError> {
        let mut kv = SqliteKv::open_in_memory()?;
        let mut batch = WriteBatch::new();
        batch
            .put("snapshots_h:a", json!({}))
            .put("snapshotsXh:b", json!({}))
            .put("metrics", json!({}));
        kv.apply(batch)?;
        assert_eq!(kv.keys_with_prefix("snapshots_")?, vec!["snapshots_h:a".to_string()]);
        Ok(())
    }

    #[test]
    fn reopened_store_keeps_values() -> Result<(), KvError> {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("nested/store.sqlite3");
        {
            let mut kv = SqliteKv::open(&path)?;
            let mut batch = WriteBatch::new();
            batch.put("combLastRun", json!(1_700_000_000_000_i64));
            kv.apply(batch)?;
        }
        let kv = SqliteKv::open(&path)?;
        assert_eq!(kv.get("combLastRun")?, Some(json!(1_700_000_000_000_i64)));
        Ok(())
    }
}
