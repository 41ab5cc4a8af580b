//! Advisory locks.
//!
//! Two independent locks exist:
//!
//! - [`WriterLock`]: an exclusive OS file lock next to the database file.
//!   It keeps a second `reelstats` process from opening the same store for
//!   writing.
//! - The purge lock: a timestamp stored under [`keys::PURGE_LOCK`] while a
//!   destructive bulk operation (explicit purge, comb run) is in progress.
//!   Writers that see it defer. It is advisory; a lock older than the stale
//!   threshold is treated as abandoned.

use crate::error::ErrorCode;
use crate::kv::{KvError, KvStore, WriteBatch, keys};
use fs2::FileExt;
use serde_json::json;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};
use tracing::warn;

/// Lock acquisition errors.
#[derive(Debug)]
pub enum LockError {
    /// The writer file lock stayed held for the whole timeout.
    Timeout { path: PathBuf, waited: Duration },
    /// A live purge lock is held since the given epoch millis.
    PurgeHeld { since: i64 },
    IoError(io::Error),
    Storage(KvError),
}

impl From<io::Error> for LockError {
    fn from(err: io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<KvError> for LockError {
    fn from(err: KvError) -> Self {
        Self::Storage(err)
    }
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::PurgeHeld { .. } => ErrorCode::PurgeInProgress,
            Self::IoError(_) | Self::Storage(_) => ErrorCode::StorageWriteFailed,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { path, waited } => {
                write!(
                    f,
                    "{}: lock timed out after {:?} at {}",
                    self.code().code(),
                    waited,
                    path.display()
                )
            }
            Self::PurgeHeld { since } => {
                write!(f, "{}: purge lock held since {since}", self.code().code())
            }
            Self::IoError(err) => write!(f, "{}: {}", self.code().code(), err),
            Self::Storage(err) => write!(f, "{}: {}", self.code().code(), err),
        }
    }
}

impl std::error::Error for LockError {}

// ---------------------------------------------------------------------------
// WriterLock
// ---------------------------------------------------------------------------

/// RAII guard for the store-wide exclusive writer lock.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    /// Acquire an exclusive advisory lock on `path`, polling until `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another holder keeps the lock for
    /// the whole timeout, or an I/O error if the lock file cannot be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "lock path has no parent")
        })?;
        fs::create_dir_all(parent)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)?;

            if file.try_lock_exclusive().is_ok() {
                return Ok(Self {
                    file,
                    path: path.to_path_buf(),
                });
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Explicitly release the lock. Release also happens automatically on drop.
    pub fn release(self) {
        drop(self);
    }

    /// Return the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

// ---------------------------------------------------------------------------
// Purge lock
// ---------------------------------------------------------------------------

/// Default age after which a purge lock is considered abandoned.
pub const DEFAULT_PURGE_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Epoch millis at which the current purge lock was taken, if one is stored.
///
/// # Errors
///
/// Returns an error if the backend cannot be read.
pub fn purge_lock_since<K: KvStore + ?Sized>(kv: &K) -> Result<Option<i64>, KvError> {
    Ok(kv.get(keys::PURGE_LOCK)?.and_then(|value| value.as_i64()))
}

/// Returns the lock timestamp if a purge lock is live at `now_ms`.
///
/// # Errors
///
/// Returns an error if the backend cannot be read.
pub fn live_purge_lock<K: KvStore + ?Sized>(
    kv: &K,
    now_ms: i64,
    stale_after: Duration,
) -> Result<Option<i64>, KvError> {
    let stale_ms = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
    Ok(purge_lock_since(kv)?.filter(|since| now_ms.saturating_sub(*since) < stale_ms))
}

/// Take the purge lock at `now_ms`.
///
/// An existing lock older than `stale_after` is overwritten with a warning.
///
/// # Errors
///
/// Returns [`LockError::PurgeHeld`] if a live lock exists, or a storage
/// error if the flag cannot be read or written.
pub fn acquire_purge_lock<K: KvStore + ?Sized>(
    kv: &mut K,
    now_ms: i64,
    stale_after: Duration,
) -> Result<(), LockError> {
    if let Some(since) = live_purge_lock(kv, now_ms, stale_after)? {
        return Err(LockError::PurgeHeld { since });
    }
    if let Some(abandoned) = purge_lock_since(kv)? {
        warn!(since = abandoned, "overriding stale purge lock");
    }
    let mut batch = WriteBatch::new();
    batch.put(keys::PURGE_LOCK, json!(now_ms));
    kv.apply(batch)?;
    Ok(())
}

/// Clear the purge lock.
///
/// # Errors
///
/// Returns an error if the flag cannot be removed.
pub fn release_purge_lock<K: KvStore + ?Sized>(kv: &mut K) -> Result<(), KvError> {
    let mut batch = WriteBatch::new();
    batch.delete(keys::PURGE_LOCK);
    kv.apply(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    fn lock_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push("reelstats_lock_tests");
        path.push(name);
        path
    }

    #[test]
    fn writer_lock_allows_acquire_and_release() -> Result<(), LockError> {
        let path = lock_path("basic.lock");
        let lock = WriterLock::acquire(&path, Duration::from_millis(50))?;
        assert_eq!(lock.path(), path.as_path());
        lock.release();
        Ok(())
    }

    #[test]
    fn writer_lock_times_out_when_held() {
        let path = lock_path("timeout.lock");
        let _guard = WriterLock::acquire(&path, Duration::from_millis(50)).expect("first acquire");
        let err = WriterLock::acquire(&path, Duration::from_millis(20)).expect_err("held lock");

        assert!(matches!(err, LockError::Timeout { path: ref p, .. } if *p == path));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
    }

    #[test]
    fn contention_is_resolved_after_writer_releases() -> Result<(), LockError> {
        let path = lock_path("thread.lock");

        let blocker = Arc::new(Barrier::new(2));
        let waiter = Arc::new(Barrier::new(2));

        let blocker_thread = Arc::clone(&blocker);
        let waiter_thread = Arc::clone(&waiter);
        let path_in_thread = path.clone();
        let handle = thread::spawn(move || {
            let _writer =
                WriterLock::acquire(&path_in_thread, Duration::from_millis(200)).expect("thread acquire");
            blocker_thread.wait();
            waiter_thread.wait();
        });

        blocker.wait();
        assert!(matches!(
            WriterLock::acquire(&path, Duration::from_millis(20)),
            Err(LockError::Timeout { .. })
        ));
        waiter.wait();
        handle.join().expect("lock thread");

        let follow_up = WriterLock::acquire(&path, Duration::from_millis(50))?;
        follow_up.release();
        Ok(())
    }

    #[test]
    fn purge_lock_blocks_second_acquire_until_released() -> Result<(), LockError> {
        let mut kv = MemoryKv::new();
        acquire_purge_lock(&mut kv, 1_000, DEFAULT_PURGE_STALE_AFTER)?;
        let err = acquire_purge_lock(&mut kv, 2_000, DEFAULT_PURGE_STALE_AFTER).expect_err("second acquire");
        assert!(matches!(err, LockError::PurgeHeld { since: 1_000 }));
        assert_eq!(err.code(), ErrorCode::PurgeInProgress);

        release_purge_lock(&mut kv)?;
        assert_eq!(purge_lock_since(&kv)?, None);
        acquire_purge_lock(&mut kv, 3_000, DEFAULT_PURGE_STALE_AFTER)?;
        Ok(())
    }

    #[test]
    fn stale_purge_lock_is_overridden() -> Result<(), LockError> {
        let mut kv = MemoryKv::new();
        acquire_purge_lock(&mut kv, 0, Duration::from_secs(60))?;
        assert_eq!(live_purge_lock(&kv, 59_999, Duration::from_secs(60))?, Some(0));
        assert_eq!(live_purge_lock(&kv, 60_000, Duration::from_secs(60))?, None);
        acquire_purge_lock(&mut kv, 60_000, Duration::from_secs(60))?;
        assert_eq!(purge_lock_since(&kv)?, Some(60_000));
        Ok(())
    }
}
