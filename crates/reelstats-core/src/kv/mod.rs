//! Key-value persistence backends.
//!
//! The store sees persistence as a flat map of string keys to JSON values.
//! Writes go through [`WriteBatch`] so a single logical save (cold shards,
//! hot record, users index) commits atomically or not at all.

mod memory;
mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::{DEFAULT_BUSY_TIMEOUT, SqliteKv};

use serde_json::Value;

use crate::error::ErrorCode;

/// Well-known storage keys.
pub mod keys {
    /// Hot user table.
    pub const METRICS: &str = "metrics";
    /// Prefix of per-identity cold shards.
    pub const SHARD_PREFIX: &str = "snapshots_";
    /// Flat `{key, handle, postCount}` list.
    pub const USERS_INDEX: &str = "metricsUsersIndex";
    /// Epoch-millis marker bumped by every save.
    pub const UPDATED_AT: &str = "metricsUpdatedAt";
    /// Advisory lock held by destructive bulk operations.
    pub const PURGE_LOCK: &str = "purgeLock";
    /// Epoch millis of the last successful comb run.
    pub const COMB_LAST_RUN: &str = "combLastRun";
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("value encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend refused the operation (quota, transient unavailability).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl KvError {
    /// Machine-readable code for a failed read.
    #[must_use]
    pub const fn read_code(&self) -> ErrorCode {
        match self {
            Self::Encoding(_) => ErrorCode::CorruptRecord,
            _ => ErrorCode::StorageReadFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// One write operation inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put(String, Value),
    Delete(String),
}

/// Ordered group of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.ops.push(WriteOp::Put(key.into(), value));
        self
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete(key.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

// ---------------------------------------------------------------------------
// KvStore
// ---------------------------------------------------------------------------

/// A persistent string-keyed store of structured values.
pub trait KvStore {
    /// Read one value. Missing keys are `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Value>, KvError>;

    /// Apply every operation of `batch`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be committed; nothing is
    /// written in that case.
    fn apply(&mut self, batch: WriteBatch) -> Result<(), KvError>;

    /// List keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_preserves_operation_order() {
        let mut batch = WriteBatch::new();
        batch.put("a", json!(1)).delete("b").put("c", json!(2));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.ops()[1], WriteOp::Delete("b".into()));
    }

    #[test]
    fn encoding_errors_map_to_corrupt_record() {
        let err = serde_json::from_str::<Value>("{").expect_err("invalid json");
        assert_eq!(KvError::from(err).read_code(), ErrorCode::CorruptRecord);
        assert_eq!(
            KvError::Unavailable("quota".into()).read_code(),
            ErrorCode::StorageReadFailed
        );
    }
}
