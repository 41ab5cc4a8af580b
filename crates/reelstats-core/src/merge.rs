//! Snapshot merge engine.
//!
//! Every write path in the store is a join: incoming data is merged into
//! what is already there, never substituted for it. The join for a metric
//! series buckets both inputs by normalized timestamp and, on collision,
//! keeps the larger value of each metric.
//!
//! The resulting operations are commutative, associative and idempotent.

use std::collections::BTreeMap;

use tracing::trace;

use crate::model::snapshot::normalize_timestamp;
use crate::model::{Post, SNAPSHOT_NUMERIC_FIELDS, SeriesPoint, Snapshot, User};

/// State that can absorb another state of the same type.
pub trait Merge {
    fn merge(&mut self, other: Self);
}

// ---------------------------------------------------------------------------
// Field-wise snapshot join
// ---------------------------------------------------------------------------

impl Merge for Snapshot {
    /// Join two captures of the same instant. `t` of `self` is kept.
    fn merge(&mut self, other: Self) {
        for metric in SNAPSHOT_NUMERIC_FIELDS {
            let slot = self.slot_mut(metric);
            *slot = match (*slot, other.get(metric)) {
                (Some(mine), Some(theirs)) => Some(mine.max(theirs)),
                (mine, theirs) => mine.or(theirs),
            };
        }
    }
}

/// Merge two snapshot lists into one ascending, timestamp-unique list.
///
/// Timestamps are normalized first (seconds become milliseconds).
/// Snapshots with unusable timestamps are dropped. Never fails.
#[must_use]
pub fn merge_snapshots(existing: &[Snapshot], incoming: &[Snapshot]) -> Vec<Snapshot> {
    let mut by_time: BTreeMap<i64, Snapshot> = BTreeMap::new();
    let mut dropped = 0_usize;

    for snapshot in existing.iter().chain(incoming) {
        let Some(t) = normalize_timestamp(snapshot.t) else {
            dropped += 1;
            continue;
        };
        let normalized = Snapshot { t, ..*snapshot };
        by_time
            .entry(t)
            .and_modify(|current| current.merge(normalized))
            .or_insert(normalized);
    }

    if dropped > 0 {
        trace!(dropped, "dropped snapshots with unusable timestamps");
    }
    by_time.into_values().collect()
}

/// Merge two follower/cameo series. Colliding timestamps keep the larger count.
#[must_use]
pub fn merge_series(existing: &[SeriesPoint], incoming: &[SeriesPoint]) -> Vec<SeriesPoint> {
    let mut by_time: BTreeMap<i64, u64> = BTreeMap::new();
    for point in existing.iter().chain(incoming) {
        let Some(t) = normalize_timestamp(point.t) else {
            continue;
        };
        by_time
            .entry(t)
            .and_modify(|count| *count = (*count).max(point.count))
            .or_insert(point.count);
    }
    by_time
        .into_iter()
        .map(|(t, count)| SeriesPoint::new(t, count))
        .collect()
}

// ---------------------------------------------------------------------------
// Record-level joins
// ---------------------------------------------------------------------------

fn fill<T>(mine: &mut Option<T>, theirs: Option<T>) {
    if mine.is_none() {
        *mine = theirs;
    }
}

fn keep_max(mine: &mut Option<i64>, theirs: Option<i64>) {
    *mine = match (*mine, theirs) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
}

impl Merge for Post {
    /// Join two records of the same post. Descriptive fields already set on
    /// `self` win; snapshots are unioned.
    fn merge(&mut self, other: Self) {
        fill(&mut self.url, other.url);
        fill(&mut self.thumb, other.thumb);
        fill(&mut self.caption, other.caption);
        fill(&mut self.owner_key, other.owner_key);
        fill(&mut self.owner_handle, other.owner_handle);
        fill(&mut self.owner_id, other.owner_id);
        fill(&mut self.post_time, other.post_time);
        keep_max(&mut self.last_seen, other.last_seen);
        self.snapshots = merge_snapshots(&self.snapshots, &other.snapshots);
    }
}

impl Merge for User {
    fn merge(&mut self, other: Self) {
        fill(&mut self.handle, other.handle);
        fill(&mut self.id, other.id);
        for (post_id, post) in other.posts {
            match self.posts.get_mut(&post_id) {
                Some(existing) => existing.merge(post),
                None => {
                    let mut post = post;
                    post.snapshots = merge_snapshots(&[], &post.snapshots);
                    self.posts.insert(post_id, post);
                }
            }
        }
        self.followers = merge_series(&self.followers, &other.followers);
        self.cameos = merge_series(&self.cameos, &other.cameos);
    }
}
