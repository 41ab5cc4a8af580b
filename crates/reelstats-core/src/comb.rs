//! Retention downsampling ("comb mode").
//!
//! Recent history is kept at full resolution. Older snapshots are thinned
//! so that, walking oldest to newest, each kept snapshot is at least the
//! minimum gap after the previous kept one. Runs under the purge lock.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::config::CombConfig;
use crate::identity::are_equivalent_user_keys;
use crate::kv::{KvStore, WriteBatch, keys};
use crate::model::{IdentityKey, MetricsTable, Snapshot};
use crate::store::{MetricsStore, StoreError};

/// Thin `series` relative to `now_ms`.
///
/// Snapshots at or after `now_ms - recent_ms` are kept. Older snapshots are
/// kept only if at least `min_gap_ms` has passed since the previously kept
/// one. Output is ascending.
#[must_use]
pub fn comb_snapshots(
    series: &[Snapshot],
    now_ms: i64,
    recent_ms: i64,
    min_gap_ms: i64,
) -> Vec<Snapshot> {
    let cutoff = now_ms.saturating_sub(recent_ms);
    let mut ordered = series.to_vec();
    ordered.sort_by_key(|snapshot| snapshot.t);

    let mut kept = Vec::with_capacity(ordered.len());
    let mut last_kept: Option<i64> = None;
    for snapshot in ordered {
        let keep = snapshot.t >= cutoff
            || last_kept.is_none_or(|last| snapshot.t.saturating_sub(last) >= min_gap_ms);
        if keep {
            last_kept = Some(snapshot.t);
            kept.push(snapshot);
        }
    }
    kept
}

fn is_excepted(table: &MetricsTable, exceptions: &[IdentityKey], key: &IdentityKey) -> bool {
    exceptions
        .iter()
        .any(|exception| are_equivalent_user_keys(table, exception, key))
}

/// Result of one comb pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CombReport {
    /// Buckets examined.
    pub users: usize,
    /// Posts whose history shrank.
    pub posts: usize,
    /// Snapshots removed.
    pub removed: usize,
    /// Buckets left alone because of the exception list.
    pub skipped: Vec<IdentityKey>,
}

/// Result of [`MetricsStore::run_comb_if_due`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CombOutcome {
    /// Comb mode is turned off.
    Disabled,
    /// The last run is too recent.
    NotDue { next_at: i64 },
    Ran(CombReport),
}

impl<K: KvStore> MetricsStore<K> {
    /// Epoch millis of the last successful comb run.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn comb_last_run(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .kv
            .get(keys::COMB_LAST_RUN)
            .map_err(StoreError::Read)?
            .and_then(|value| value.as_i64()))
    }

    /// Thin every non-excepted bucket now, regardless of schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PurgeInProgress`] if another destructive pass
    /// holds the lock, or a storage error.
    #[instrument(skip(self))]
    pub fn run_comb(&mut self, now_ms: i64) -> Result<CombReport, StoreError> {
        let config: CombConfig = self.config.comb.clone();
        self.with_purge_lock(now_ms, |store| {
            let mut report = CombReport::default();
            let mut targets = Vec::new();
            for key in store.real_keys() {
                if is_excepted(&store.table, &config.exceptions, &key) {
                    report.skipped.push(key);
                } else {
                    targets.push(key);
                }
            }
            store.ensure_full_snapshots(&targets)?;

            let mut changed = Vec::new();
            for key in &targets {
                let Some(user) = store.table.get_mut(key) else {
                    continue;
                };
                report.users += 1;
                let mut bucket_changed = false;
                for post in user.posts.values_mut() {
                    let combed = comb_snapshots(
                        &post.snapshots,
                        now_ms,
                        config.recent_window_ms(),
                        config.min_gap_ms(),
                    );
                    let removed = post.snapshots.len() - combed.len();
                    if removed > 0 {
                        post.snapshots = combed;
                        report.posts += 1;
                        report.removed += removed;
                        bucket_changed = true;
                    }
                }
                if bucket_changed {
                    changed.push(key.clone());
                }
            }

            if !changed.is_empty() {
                store.dirty.extend(changed.iter().cloned());
                store.save(&changed)?;
            }
            let mut batch = WriteBatch::new();
            batch.put(keys::COMB_LAST_RUN, json!(now_ms));
            store.kv.apply(batch).map_err(StoreError::Write)?;

            info!(
                users = report.users,
                posts = report.posts,
                removed = report.removed,
                skipped = report.skipped.len(),
                "comb pass finished"
            );
            Ok(report)
        })
    }

    /// Run a comb pass if enabled and at least one interval has passed since
    /// the last successful run. `force` ignores both conditions.
    ///
    /// # Errors
    ///
    /// See [`MetricsStore::run_comb`].
    pub fn run_comb_if_due(&mut self, now_ms: i64, force: bool) -> Result<CombOutcome, StoreError> {
        if !force {
            if !self.config.comb.enabled {
                return Ok(CombOutcome::Disabled);
            }
            if let Some(last) = self.comb_last_run()? {
                let next_at = last.saturating_add(self.config.comb.interval_ms());
                if now_ms < next_at {
                    debug!(next_at, "comb not due");
                    return Ok(CombOutcome::NotDue { next_at });
                }
            }
        }
        self.run_comb(now_ms).map(CombOutcome::Ran)
    }
}
