//! Hot/cold persistence round trips over both backends.

use reelstats_core::ingest::PostObservation;
use reelstats_core::kv::{KvStore, MemoryKv, SqliteKv, keys};
use reelstats_core::model::{IdentityKey, Metric, Snapshot};
use reelstats_core::{ErrorCode, MetricsStore, StoreConfig};
use serde_json::{Value, json};
use tempfile::TempDir;

const NOW: i64 = 1_700_000_500_000;

fn key(raw: &str) -> IdentityKey {
    raw.parse().expect("valid key")
}

fn observe(guess: &str, post_id: &str, snapshot: Value) -> PostObservation {
    serde_json::from_value(json!({
        "kind": "post",
        "identityKeyGuess": guess,
        "postId": post_id,
        "snapshot": snapshot,
    }))
    .expect("observation")
}

fn seed_p1<K: KvStore>(store: &mut MetricsStore<K>) {
    store
        .ingest_post(&observe("h:alice", "p1", json!({"t": 1000, "likes": 1})), NOW)
        .expect("ingest t=1000");
    store
        .ingest_post(&observe("h:alice", "p1", json!({"t": 2000, "likes": 2})), NOW)
        .expect("ingest t=2000");
}

#[test]
fn hot_holds_latest_and_cold_holds_history() {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    store.save(&[key("h:alice")]).expect("save");

    let entries = store.backend().entries();
    let hot = &entries[keys::METRICS]["users"]["h:alice"]["posts"]["p1"]["snapshots"];
    assert_eq!(hot, &json!([{"t": 2_000_000, "likes": 2}]));
    let cold = &entries["snapshots_h:alice"]["p1"];
    assert_eq!(
        cold,
        &json!([{"t": 1_000_000, "likes": 1}, {"t": 2_000_000, "likes": 2}])
    );
    assert_eq!(
        entries[keys::USERS_INDEX],
        json!([{"key": "h:alice", "handle": "alice", "postCount": 1}])
    );

    let kv = store.into_backend();
    let mut reopened = MetricsStore::open(kv, StoreConfig::default()).expect("reopen");
    assert_eq!(reopened.table().users[&key("h:alice")].posts["p1"].snapshots.len(), 1);
    assert!(!reopened.is_hydrated(&key("h:alice")));

    reopened
        .ensure_full_snapshots(&[key("h:alice")])
        .expect("hydrate");
    let snapshots = &reopened.table().users[&key("h:alice")].posts["p1"].snapshots;
    assert_eq!(
        snapshots,
        &vec![
            Snapshot::at(1_000_000).with(Metric::Likes, 1),
            Snapshot::at(2_000_000).with(Metric::Likes, 2),
        ]
    );
}

#[test]
fn save_then_hydrate_matches_pre_save_state() {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    store
        .ingest_post(&observe("id:9", "q", json!({"t": 1_700_000_000, "views": 4})), NOW)
        .expect("ingest");
    let before = store.table().clone();

    store.save_dirty().expect("save");
    let mut reopened =
        MetricsStore::open(store.into_backend(), StoreConfig::default()).expect("reopen");
    reopened.hydrate_all().expect("hydrate");
    assert_eq!(reopened.table(), &before);
}

#[test]
fn unhydrated_save_keeps_older_history() {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    store.save_dirty().expect("save");

    let mut second =
        MetricsStore::open(store.into_backend(), StoreConfig::default()).expect("reopen");
    second
        .ingest_post(&observe("h:alice", "p1", json!({"t": 3000, "likes": 5})), NOW)
        .expect("ingest");
    second.save_dirty().expect("save without hydrating");

    let cold = &second.backend().entries()["snapshots_h:alice"]["p1"];
    assert_eq!(cold.as_array().map(Vec::len), Some(3));
}

#[test]
fn failed_write_commits_nothing_and_keeps_dirty() {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    store.backend_mut().set_fail_writes(true);

    let err = store.save_dirty().expect_err("write refused");
    assert_eq!(err.code(), ErrorCode::StorageWriteFailed);
    assert!(err.is_retryable());
    assert!(store.backend().entries().is_empty());
    assert_eq!(store.dirty_keys().count(), 1);
    assert!(!store.is_hydrated(&key("h:alice")));

    store.backend_mut().set_fail_writes(false);
    assert_eq!(store.save_dirty().expect("retry"), 1);
    assert!(store.backend().entries().contains_key("snapshots_h:alice"));
}

#[test]
fn failed_hydration_leaves_memory_untouched() {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    store.save_dirty().expect("save");

    let mut reopened =
        MetricsStore::open(store.into_backend(), StoreConfig::default()).expect("reopen");
    let before = reopened.table().clone();
    reopened.backend_mut().set_fail_reads(true);

    let err = reopened
        .ensure_full_snapshots(&[key("h:alice")])
        .expect_err("read refused");
    assert_eq!(err.code(), ErrorCode::StorageReadFailed);
    assert_eq!(reopened.table(), &before);
    assert!(!reopened.is_hydrated(&key("h:alice")));
}

#[test]
fn corrupt_shard_is_reported_not_overwritten() {
    let mut kv = MemoryKv::new();
    let mut batch = reelstats_core::kv::WriteBatch::new();
    batch.put("snapshots_h:alice", json!("garbage"));
    kv.apply(batch).expect("seed");

    let mut store = MetricsStore::open(kv, StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    let err = store.save_dirty().expect_err("corrupt shard");
    assert_eq!(err.code(), ErrorCode::CorruptRecord);
    assert_eq!(store.backend().entries()["snapshots_h:alice"], json!("garbage"));
}

#[test]
fn sqlite_backend_round_trips_across_reopen() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("reelstats.db");

    {
        let kv = SqliteKv::open(&path).expect("open sqlite");
        let mut store = MetricsStore::open(kv, StoreConfig::default()).expect("open store");
        seed_p1(&mut store);
        store.save_dirty().expect("save");
    }

    let kv = SqliteKv::open(&path).expect("reopen sqlite");
    let shard_keys = kv.keys_with_prefix(keys::SHARD_PREFIX).expect("scan");
    assert_eq!(shard_keys, vec!["snapshots_h:alice".to_string()]);

    let mut store = MetricsStore::open(kv, StoreConfig::default()).expect("reopen store");
    assert!(store.updated_at().expect("marker").is_some());
    store.hydrate_all().expect("hydrate");
    let snapshots = &store.table().users[&key("h:alice")].posts["p1"].snapshots;
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].likes, Some(2));
}

#[test]
fn removed_bucket_drops_its_shard() {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    seed_p1(&mut store);
    store.save_dirty().expect("save");

    store
        .purge_user(&key("h:alice"), NOW)
        .expect("purge");
    let entries = store.backend().entries();
    assert!(!entries.contains_key("snapshots_h:alice"));
    assert_eq!(entries[keys::METRICS]["users"], json!({}));
    assert_eq!(entries[keys::USERS_INDEX], json!([]));
}
