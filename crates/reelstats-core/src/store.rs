//! The tiered metrics store.
//!
//! [`MetricsStore`] owns the in-memory working copy of the user table and
//! the key-value backend it persists to. Persistence is split in two tiers:
//!
//! - **hot**: the `metrics` record holds every bucket with only the latest
//!   snapshot per post, plus the users index and the `metricsUpdatedAt`
//!   marker. It is small and read in full on open.
//! - **cold**: one `snapshots_<key>` shard per bucket holds the full
//!   snapshot history of each post. Shards are read lazily.
//!
//! A bucket is *hydrated* once its cold shard has been merged into memory.
//! Saving a bucket that is not hydrated reads its shard first so history
//! written by an earlier session is never replaced by the partial copy.
//!
//! Every mutation takes `&mut self`; there is exactly one writer per store
//! value. Each save commits as one [`WriteBatch`] (cold shards first, then
//! the hot record) and the working copy is only updated after the batch
//! commits.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::error::ErrorCode;
use crate::identity::{self, MergedUser, ResolvedUser, find_alias_keys};
use crate::ingest::{IngestOutcome, PostObservation, ProfileObservation};
use crate::kv::{KvError, KvStore, WriteBatch, keys};
use crate::lock::{self, LockError};
use crate::merge::{Merge, merge_series, merge_snapshots};
use crate::model::{
    IdentityKey, MetricsTable, ParseIdentityKeyError, SeriesPoint, Snapshot, User, UserIndexEntry,
};
use crate::reconcile::{self, ReconcileReport};

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage read failed: {0}")]
    Read(#[source] KvError),

    #[error("storage write failed: {0}")]
    Write(#[source] KvError),

    #[error("stored record {key} could not be decoded: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("purge in progress since {since}")]
    PurgeInProgress { since: i64 },

    #[error("cannot write to virtual key {0}")]
    VirtualKeyWrite(IdentityKey),

    #[error("no bucket for {0}")]
    UserNotFound(IdentityKey),

    #[error(transparent)]
    InvalidKey(#[from] ParseIdentityKeyError),

    #[error("export bundle version {found} is newer than supported version {supported}")]
    UnsupportedExport { found: u32, supported: u32 },

    #[error(transparent)]
    Lock(LockError),
}

impl From<LockError> for StoreError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::PurgeHeld { since } => Self::PurgeInProgress { since },
            LockError::Storage(err) => Self::Write(err),
            other => Self::Lock(other),
        }
    }
}

impl StoreError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read(err) => err.read_code(),
            Self::Write(_) => ErrorCode::StorageWriteFailed,
            Self::Corrupt { .. } | Self::UnsupportedExport { .. } => ErrorCode::CorruptRecord,
            Self::PurgeInProgress { .. } => ErrorCode::PurgeInProgress,
            Self::VirtualKeyWrite(_) => ErrorCode::VirtualKeyWrite,
            Self::UserNotFound(_) => ErrorCode::UserNotFound,
            Self::InvalidKey(_) => ErrorCode::InvalidIdentityKey,
            Self::Lock(err) => err.code(),
        }
    }

    /// `true` if repeating the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Read(_)
                | Self::Write(_)
                | Self::PurgeInProgress { .. }
                | Self::Lock(LockError::Timeout { .. })
        )
    }
}

// ---------------------------------------------------------------------------
// Record codecs
// ---------------------------------------------------------------------------

/// Cold shard contents: full snapshot history per post id.
pub type ShardHistory = BTreeMap<String, Vec<Snapshot>>;

fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|err| StoreError::Write(KvError::Encoding(err)))
}

/// Hot record buckets that could not be decoded, kept verbatim by raw key.
pub type UnreadableBuckets = BTreeMap<String, Value>;

/// Decode the hot record. Buckets with an invalid key or body are set aside
/// unchanged so the next save writes them back.
fn decode_table(value: &Value) -> Result<(MetricsTable, UnreadableBuckets), StoreError> {
    let users = value
        .get("users")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::Corrupt {
            key: keys::METRICS.to_string(),
            reason: "expected an object with a `users` map".to_string(),
        })?;

    let mut table = MetricsTable::default();
    let mut unreadable = UnreadableBuckets::new();
    for (raw_key, raw_user) in users {
        let Ok(key) = raw_key.parse::<IdentityKey>() else {
            warn!(key = %raw_key, "keeping bucket with invalid identity key as-is");
            unreadable.insert(raw_key.clone(), raw_user.clone());
            continue;
        };
        if key.is_virtual() {
            continue;
        }
        match serde_json::from_value::<User>(raw_user.clone()) {
            Ok(user) => {
                table.users.insert(key, user);
            }
            Err(err) => {
                warn!(%key, error = %err, "keeping undecodable bucket as-is");
                unreadable.insert(raw_key.clone(), raw_user.clone());
            }
        }
    }
    Ok((table, unreadable))
}

/// Hot copy of `user`, taking each post's latest snapshot from the merged
/// cold history when one was just written.
fn hot_bucket(user: &User, history: Option<&ShardHistory>) -> User {
    let mut hot = user.to_hot();
    if let Some(history) = history {
        for (post_id, post) in &mut hot.posts {
            if let Some(snapshots) = history.get(post_id) {
                post.snapshots = snapshots.last().copied().into_iter().collect();
            }
        }
    }
    hot
}

/// Index entry for a bucket that only exists as raw JSON.
fn unreadable_index_entry(raw_key: &str, raw_user: &Value) -> Option<UserIndexEntry> {
    let key = raw_key.parse::<IdentityKey>().ok()?;
    Some(UserIndexEntry {
        key,
        handle: raw_user
            .get("handle")
            .and_then(Value::as_str)
            .map(str::to_string),
        post_count: raw_user
            .get("posts")
            .and_then(Value::as_object)
            .map_or(0, serde_json::Map::len),
    })
}

/// Decode a cold shard. Malformed snapshots are dropped individually.
fn decode_shard(shard_key: &str, value: &Value) -> Result<ShardHistory, StoreError> {
    let posts = value.as_object().ok_or_else(|| StoreError::Corrupt {
        key: shard_key.to_string(),
        reason: "expected a map of post id to snapshots".to_string(),
    })?;

    let mut history = ShardHistory::new();
    for (post_id, raw) in posts {
        let Some(items) = raw.as_array() else {
            warn!(shard = shard_key, %post_id, "skipping non-array history");
            continue;
        };
        let parsed: Vec<Snapshot> = items.iter().filter_map(Snapshot::from_value).collect();
        history.insert(post_id.clone(), merge_snapshots(&[], &parsed));
    }
    Ok(history)
}

// ---------------------------------------------------------------------------
// MetricsStore
// ---------------------------------------------------------------------------

/// Single-writer store over a [`KvStore`] backend.
#[derive(Debug)]
pub struct MetricsStore<K> {
    pub(crate) kv: K,
    pub(crate) table: MetricsTable,
    pub(crate) hydrated: HashSet<IdentityKey>,
    pub(crate) dirty: BTreeSet<IdentityKey>,
    pub(crate) config: StoreConfig,
    unreadable: UnreadableBuckets,
    last_marker: Option<i64>,
}

impl<K: KvStore> MetricsStore<K> {
    /// Open a store, reading the hot record from `kv`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or the hot record is
    /// not a user table at all.
    #[instrument(skip_all)]
    pub fn open(kv: K, config: StoreConfig) -> Result<Self, StoreError> {
        let (table, unreadable) = match kv.get(keys::METRICS).map_err(StoreError::Read)? {
            Some(value) => decode_table(&value)?,
            None => (MetricsTable::default(), UnreadableBuckets::new()),
        };
        let last_marker = kv
            .get(keys::UPDATED_AT)
            .map_err(StoreError::Read)?
            .and_then(|value| value.as_i64());
        info!(
            users = table.users.len(),
            posts = table.post_count(),
            "loaded metrics table"
        );
        Ok(Self {
            kv,
            table,
            hydrated: HashSet::new(),
            dirty: BTreeSet::new(),
            config,
            unreadable,
            last_marker,
        })
    }

    #[must_use]
    pub const fn table(&self) -> &MetricsTable {
        &self.table
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub const fn backend(&self) -> &K {
        &self.kv
    }

    pub fn backend_mut(&mut self) -> &mut K {
        &mut self.kv
    }

    #[must_use]
    pub fn into_backend(self) -> K {
        self.kv
    }

    /// `true` once `key`'s cold history has been merged into memory.
    #[must_use]
    pub fn is_hydrated(&self, key: &IdentityKey) -> bool {
        self.hydrated.contains(key)
    }

    /// Keys with unsaved changes.
    pub fn dirty_keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.dirty.iter()
    }

    /// Hot record buckets that failed to decode on open.
    #[must_use]
    pub const fn unreadable(&self) -> &UnreadableBuckets {
        &self.unreadable
    }

    /// `true` if a live bucket now occupies `raw_key`.
    fn shadows(&self, raw_key: &str) -> bool {
        raw_key
            .parse::<IdentityKey>()
            .is_ok_and(|key| self.table.get(&key).is_some())
    }

    /// Flat listing of every real bucket.
    #[must_use]
    pub fn users_index(&self) -> Vec<UserIndexEntry> {
        let mut index: Vec<UserIndexEntry> = self
            .table
            .users
            .iter()
            .filter(|(key, _)| !key.is_virtual())
            .map(|(key, user)| UserIndexEntry::from_user(key, user))
            .collect();
        index.extend(
            self.unreadable
                .iter()
                .filter(|(raw_key, _)| !self.shadows(raw_key))
                .filter_map(|(raw_key, raw_user)| unreadable_index_entry(raw_key, raw_user)),
        );
        index
    }

    /// The persisted `metricsUpdatedAt` marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn updated_at(&self) -> Result<Option<i64>, StoreError> {
        Ok(self
            .kv
            .get(keys::UPDATED_AT)
            .map_err(StoreError::Read)?
            .and_then(|value| value.as_i64()))
    }

    pub(crate) fn ensure_no_purge(&self, now_ms: i64) -> Result<(), StoreError> {
        let stale_after = self.config.lock.purge_stale_after();
        match lock::live_purge_lock(&self.kv, now_ms, stale_after).map_err(StoreError::Read)? {
            Some(since) => {
                debug!(since, "write deferred by purge lock");
                Err(StoreError::PurgeInProgress { since })
            }
            None => Ok(()),
        }
    }

    fn read_shard(&self, key: &IdentityKey) -> Result<ShardHistory, StoreError> {
        let shard_key = key.shard_key();
        match self.kv.get(&shard_key).map_err(StoreError::Read)? {
            Some(value) => decode_shard(&shard_key, &value),
            None => Ok(ShardHistory::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Merge one post sighting into its guessed bucket.
    ///
    /// # Errors
    ///
    /// Rejects invalid or virtual keys and writes during a live purge lock.
    pub fn ingest_post(
        &mut self,
        observation: &PostObservation,
        now_ms: i64,
    ) -> Result<IngestOutcome, StoreError> {
        let key = writable(observation.key()?)?;
        let post_id = observation.post_id.trim();
        if post_id.is_empty() {
            warn!(%key, "ignoring post observation without a post id");
            return Ok(IngestOutcome::Ignored);
        }
        self.ensure_no_purge(now_ms)?;

        let incoming = observation.to_post(now_ms);
        let outcome = if incoming.snapshots.is_empty() {
            IngestOutcome::MetadataOnly
        } else {
            IngestOutcome::Recorded
        };
        let bucket = self.table.bucket_mut(&key);
        match bucket.posts.get_mut(post_id) {
            Some(existing) => existing.merge(incoming),
            None => {
                bucket.posts.insert(post_id.to_string(), incoming);
            }
        }
        self.dirty.insert(key);
        Ok(outcome)
    }

    /// Merge one profile reading (followers, cameo count, handle, id).
    ///
    /// # Errors
    ///
    /// Rejects invalid or virtual keys and writes during a live purge lock.
    pub fn ingest_profile(
        &mut self,
        observation: &ProfileObservation,
        now_ms: i64,
    ) -> Result<IngestOutcome, StoreError> {
        let key = writable(observation.key()?)?;
        let followers = observation.followers();
        let cameos = observation.cameos();
        let handle = observation.handle();
        let id = observation.id();
        if followers.is_none() && cameos.is_none() && handle.is_none() && id.is_none() {
            return Ok(IngestOutcome::Ignored);
        }
        self.ensure_no_purge(now_ms)?;

        let t = observation.timestamp_or(now_ms);
        let bucket = self.table.bucket_mut(&key);
        if bucket.handle.is_none() {
            bucket.handle = handle;
        }
        if bucket.id.is_none() {
            bucket.id = id;
        }
        if let Some(count) = followers {
            bucket.followers = merge_series(&bucket.followers, &[SeriesPoint::new(t, count)]);
        }
        if let Some(count) = cameos {
            bucket.cameos = merge_series(&bucket.cameos, &[SeriesPoint::new(t, count)]);
        }
        self.dirty.insert(key);

        Ok(if followers.is_some() || cameos.is_some() {
            IngestOutcome::Recorded
        } else {
            IngestOutcome::MetadataOnly
        })
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Persist the given buckets.
    ///
    /// For each real key: merge in-memory snapshots with the cold shard
    /// (read unless hydrated), write the merged history back, and remove the
    /// shard of a bucket that no longer exists. The hot record, users index
    /// and updated marker are rewritten in the same batch.
    ///
    /// # Errors
    ///
    /// Returns an error if a shard cannot be read or the batch cannot be
    /// committed. Nothing is written and the working copy is unchanged.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub fn save(&mut self, keys: &[IdentityKey]) -> Result<(), StoreError> {
        let targets: BTreeSet<IdentityKey> =
            keys.iter().filter(|key| !key.is_virtual()).cloned().collect();

        let mut batch = WriteBatch::new();
        let mut merged: Vec<(IdentityKey, ShardHistory)> = Vec::with_capacity(targets.len());
        for key in &targets {
            let shard_key = key.shard_key();
            let Some(user) = self.table.get(key) else {
                batch.delete(shard_key);
                continue;
            };
            let stored = if self.hydrated.contains(key) {
                ShardHistory::new()
            } else {
                self.read_shard(key)?
            };
            let history: ShardHistory = user
                .posts
                .iter()
                .map(|(post_id, post)| {
                    let cold = stored.get(post_id).map_or(&[][..], Vec::as_slice);
                    (post_id.clone(), merge_snapshots(cold, &post.snapshots))
                })
                .collect();
            batch.put(shard_key, encode(&history)?);
            merged.push((key.clone(), history));
        }

        let merged_by_key: BTreeMap<&IdentityKey, &ShardHistory> =
            merged.iter().map(|entry| (&entry.0, &entry.1)).collect();
        let hot = MetricsTable {
            users: self
                .table
                .users
                .iter()
                .filter(|(key, _)| !key.is_virtual())
                .map(|(key, user)| {
                    (key.clone(), hot_bucket(user, merged_by_key.get(key).copied()))
                })
                .collect(),
        };
        let mut hot = encode(&hot)?;
        if let Some(users) = hot.get_mut("users").and_then(Value::as_object_mut) {
            for (raw_key, raw_user) in &self.unreadable {
                if self.shadows(raw_key) {
                    warn!(key = %raw_key, "replacing undecodable bucket with live bucket");
                    continue;
                }
                users.insert(raw_key.clone(), raw_user.clone());
            }
        }
        let marker = self
            .last_marker
            .map_or_else(now_ms, |previous| now_ms().max(previous.saturating_add(1)));
        batch.put(keys::METRICS, hot);
        batch.put(keys::USERS_INDEX, encode(&self.users_index())?);
        batch.put(keys::UPDATED_AT, json!(marker));

        let writes = batch.len();
        self.kv.apply(batch).map_err(StoreError::Write)?;

        for (key, history) in merged {
            if let Some(user) = self.table.get_mut(&key) {
                for (post_id, snapshots) in history {
                    if let Some(post) = user.posts.get_mut(&post_id) {
                        post.snapshots = snapshots;
                    }
                }
            }
            self.hydrated.insert(key);
        }
        for key in &targets {
            if self.table.get(key).is_none() {
                self.hydrated.remove(key);
            }
            self.dirty.remove(key);
        }
        let live: Vec<String> = self
            .unreadable
            .keys()
            .filter(|raw_key| self.shadows(raw_key))
            .cloned()
            .collect();
        for raw_key in live {
            self.unreadable.remove(&raw_key);
        }
        self.last_marker = Some(marker);
        debug!(writes, marker, "saved metrics");
        Ok(())
    }

    /// Persist every bucket with unsaved changes. Returns how many were saved.
    ///
    /// # Errors
    ///
    /// See [`MetricsStore::save`]. Dirty keys stay dirty on failure.
    pub fn save_dirty(&mut self) -> Result<usize, StoreError> {
        let keys: Vec<IdentityKey> = self.dirty.iter().cloned().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.save(&keys)?;
        Ok(keys.len())
    }

    /// Merge cold history for `keys` and all of their aliases into memory.
    ///
    /// Returns the number of buckets newly hydrated.
    ///
    /// # Errors
    ///
    /// Returns an error if any shard cannot be read or decoded. No bucket is
    /// modified in that case.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub fn ensure_full_snapshots(&mut self, keys: &[IdentityKey]) -> Result<usize, StoreError> {
        let mut targets: BTreeSet<IdentityKey> = BTreeSet::new();
        for key in keys.iter().filter(|key| !key.is_virtual()) {
            targets.insert(key.clone());
            targets.extend(find_alias_keys(&self.table, key, None));
        }
        targets.retain(|key| !self.hydrated.contains(key) && self.table.get(key).is_some());

        let mut loaded = Vec::with_capacity(targets.len());
        for key in targets {
            let shard = self.read_shard(&key)?;
            loaded.push((key, shard));
        }

        let count = loaded.len();
        for (key, shard) in loaded {
            if let Some(user) = self.table.get_mut(&key) {
                for (post_id, post) in &mut user.posts {
                    if let Some(cold) = shard.get(post_id) {
                        post.snapshots = merge_snapshots(cold, &post.snapshots);
                    }
                }
            }
            self.hydrated.insert(key);
        }
        if count > 0 {
            debug!(hydrated = count, "merged cold history");
        }
        Ok(count)
    }

    /// Hydrate every real bucket.
    ///
    /// # Errors
    ///
    /// See [`MetricsStore::ensure_full_snapshots`].
    pub fn hydrate_all(&mut self) -> Result<usize, StoreError> {
        let keys = self.real_keys();
        self.ensure_full_snapshots(&keys)
    }

    pub(crate) fn real_keys(&self) -> Vec<IdentityKey> {
        self.table
            .users
            .keys()
            .filter(|key| !key.is_virtual())
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Resolve `key` against the in-memory table (hot data unless hydrated).
    #[must_use]
    pub fn resolve(&self, key: &IdentityKey, now_ms: i64) -> Option<ResolvedUser<'_>> {
        identity::resolve_user_for_key(&self.table, key, now_ms, &self.config.top_today)
    }

    /// Full-history view of `key` across all its aliases.
    ///
    /// # Errors
    ///
    /// Returns an error if cold history cannot be loaded.
    pub fn merged_user(&mut self, key: &IdentityKey, now_ms: i64) -> Result<MergedUser, StoreError> {
        if key.is_virtual() {
            self.hydrate_all()?;
            return Ok(MergedUser {
                key: key.clone(),
                alias_keys: Vec::new(),
                user: identity::build_top_today_user(&self.table, now_ms, &self.config.top_today),
            });
        }
        self.ensure_full_snapshots(std::slice::from_ref(key))?;
        Ok(identity::build_merged_identity_user(&self.table, key, None))
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    fn persist_report(&mut self, report: &ReconcileReport) -> Result<(), StoreError> {
        if !report.changed() {
            return Ok(());
        }
        self.dirty.extend(report.touched.iter().cloned());
        let touched: Vec<IdentityKey> = report.touched.iter().cloned().collect();
        self.save(&touched)
    }

    /// Move mis-attributed posts out of `key`'s bucket and persist.
    ///
    /// # Errors
    ///
    /// Returns an error during a live purge lock or on storage failure.
    #[instrument(skip(self), fields(key = %key))]
    pub fn prune_mismatched_posts(
        &mut self,
        key: &IdentityKey,
        now_ms: i64,
    ) -> Result<ReconcileReport, StoreError> {
        self.ensure_no_purge(now_ms)?;
        self.ensure_full_snapshots(std::slice::from_ref(key))?;
        let report = reconcile::prune_mismatched_posts_for_user(&mut self.table, key);
        self.persist_report(&report)?;
        Ok(report)
    }

    /// Move matching posts from `unknown` into `key`'s bucket and persist.
    ///
    /// # Errors
    ///
    /// Returns an error during a live purge lock or on storage failure.
    #[instrument(skip(self), fields(key = %key))]
    pub fn reclaim_from_unknown(
        &mut self,
        key: &IdentityKey,
        now_ms: i64,
    ) -> Result<ReconcileReport, StoreError> {
        self.ensure_no_purge(now_ms)?;
        self.ensure_full_snapshots(&[key.clone(), IdentityKey::Unknown])?;
        let report = reconcile::reclaim_from_unknown_for_user(&mut self.table, key);
        self.persist_report(&report)?;
        Ok(report)
    }

    /// Drop metric-less posts past the grace window and persist.
    ///
    /// # Errors
    ///
    /// Returns an error during a live purge lock or on storage failure.
    #[instrument(skip(self), fields(key = %key))]
    pub fn prune_empty_posts(
        &mut self,
        key: &IdentityKey,
        now_ms: i64,
    ) -> Result<ReconcileReport, StoreError> {
        self.ensure_no_purge(now_ms)?;
        self.ensure_full_snapshots(std::slice::from_ref(key))?;
        let grace_ms = self.config.prune.grace_ms();
        let report = reconcile::prune_empty_posts_for_user(&mut self.table, key, now_ms, grace_ms);
        self.persist_report(&report)?;
        Ok(report)
    }

    /// Reclaim, move mismatches, then prune empty posts, with one save.
    ///
    /// # Errors
    ///
    /// Returns an error during a live purge lock or on storage failure.
    #[instrument(skip(self), fields(key = %key))]
    pub fn reconcile_user(
        &mut self,
        key: &IdentityKey,
        now_ms: i64,
    ) -> Result<ReconcileReport, StoreError> {
        self.ensure_no_purge(now_ms)?;
        self.ensure_full_snapshots(&[key.clone(), IdentityKey::Unknown])?;

        let grace_ms = self.config.prune.grace_ms();
        let mut report = reconcile::reclaim_from_unknown_for_user(&mut self.table, key);
        report.absorb(reconcile::prune_mismatched_posts_for_user(
            &mut self.table,
            key,
        ));
        report.absorb(reconcile::prune_empty_posts_for_user(
            &mut self.table,
            key,
            now_ms,
            grace_ms,
        ));
        self.persist_report(&report)?;
        if report.changed() {
            info!(moved = report.moved, removed = report.removed, "reconciled bucket");
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Destructive maintenance
    // -----------------------------------------------------------------------

    /// Run `op` while holding the purge lock. The lock is released once `op`
    /// returns, whether it succeeded or failed. A panic inside `op` leaves the
    /// lock behind until it goes stale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PurgeInProgress`] if another live lock exists,
    /// `op`'s error, or a write error if the lock cannot be released.
    pub fn with_purge_lock<T>(
        &mut self,
        now_ms: i64,
        op: impl FnOnce(&mut Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        lock::acquire_purge_lock(&mut self.kv, now_ms, self.config.lock.purge_stale_after())?;
        let result = op(self);
        if let Err(err) = lock::release_purge_lock(&mut self.kv) {
            warn!(error = %err, "failed to release purge lock");
            return result.and(Err(StoreError::Write(err)));
        }
        result
    }

    /// Delete `key`'s bucket and cold shard. Returns the number of posts
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UserNotFound`] if neither a bucket nor a shard
    /// exists, or a lock/storage error. On failure the bucket is kept.
    #[instrument(skip(self), fields(key = %key))]
    pub fn purge_user(&mut self, key: &IdentityKey, now_ms: i64) -> Result<usize, StoreError> {
        let key = writable(key.clone())?;
        let has_shard = self
            .kv
            .get(&key.shard_key())
            .map_err(StoreError::Read)?
            .is_some();
        let raw_key = key.to_string();
        if self.table.get(&key).is_none() && !has_shard && !self.unreadable.contains_key(&raw_key)
        {
            return Err(StoreError::UserNotFound(key));
        }

        self.with_purge_lock(now_ms, |store| {
            let removed = store.table.users.remove(&key);
            let raw = store.unreadable.remove(&raw_key);
            let was_hydrated = store.hydrated.remove(&key);
            match store.save(std::slice::from_ref(&key)) {
                Ok(()) => {
                    let posts = removed.map_or(0, |user| user.posts.len());
                    info!(posts, "purged bucket");
                    Ok(posts)
                }
                Err(err) => {
                    if let Some(user) = removed {
                        store.table.users.insert(key.clone(), user);
                    }
                    if let Some(raw) = raw {
                        store.unreadable.insert(raw_key.clone(), raw);
                    }
                    if was_hydrated {
                        store.hydrated.insert(key.clone());
                    }
                    Err(err)
                }
            }
        })
    }
}

fn writable(key: IdentityKey) -> Result<IdentityKey, StoreError> {
    if key.is_virtual() {
        Err(StoreError::VirtualKeyWrite(key))
    } else {
        Ok(key)
    }
}
