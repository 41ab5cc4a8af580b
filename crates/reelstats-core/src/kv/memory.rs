use std::collections::BTreeMap;

use serde_json::Value;

use super::{KvError, KvStore, WriteBatch, WriteOp};

/// In-process backend.
///
/// Used by tests and by embedders that persist elsewhere. Reads and writes
/// can be made to fail on demand to exercise the no-partial-commit paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: BTreeMap<String, Value>,
    fail_reads: bool,
    fail_writes: bool,
    batches_applied: usize,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail with [`KvError::Unavailable`].
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Make every subsequent batch fail with [`KvError::Unavailable`].
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of batches committed so far.
    #[must_use]
    pub const fn batches_applied(&self) -> usize {
        self.batches_applied
    }

    /// Raw view of the stored entries.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        if self.fail_reads {
            return Err(KvError::Unavailable(format!("read of {key} refused")));
        }
        Ok(self.entries.get(key).cloned())
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<(), KvError> {
        if self.fail_writes {
            return Err(KvError::Unavailable(format!(
                "batch of {} writes refused",
                batch.len()
            )));
        }
        for op in batch.into_ops() {
            match op {
                WriteOp::Put(key, value) => {
                    self.entries.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    self.entries.remove(&key);
                }
            }
        }
        self.batches_applied += 1;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        if self.fail_reads {
            return Err(KvError::Unavailable(format!("scan of {prefix}* refused")));
        }
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_batch_commits_nothing() {
        let mut kv = MemoryKv::new();
        kv.set_fail_writes(true);
        let mut batch = WriteBatch::new();
        batch.put("a", json!(1));
        assert!(kv.apply(batch).is_err());
        kv.set_fail_writes(false);
        assert_eq!(kv.get("a").expect("read"), None);
        assert_eq!(kv.batches_applied(), 0);
    }

    #[test]
    fn prefix_scan_is_sorted_and_bounded() -> Result<(), KvError> {
        let mut kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch
            .put("snapshots_id:2", json!({}))
            .put("snapshots_h:a", json!({}))
            .put("metrics", json!({}))
            .put("snapshotz", json!({}));
        kv.apply(batch)?;
        assert_eq!(
            kv.keys_with_prefix("snapshots_")?,
            vec!["snapshots_h:a".to_string(), "snapshots_id:2".to_string()]
        );
        Ok(())
    }
}
