use reelstats_core::export::{EXPORT_VERSION, ExportBundle};
use reelstats_core::ingest::IngestEvent;
use reelstats_core::kv::{MemoryKv, keys};
use reelstats_core::model::{IdentityKey, Snapshot, User};
use reelstats_core::{ErrorCode, MetricsStore, StoreConfig};
use serde_json::json;

const NOW: i64 = 1_700_000_000_000;

fn populated() -> MetricsStore<MemoryKv> {
    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    let lines = [
        json!({"kind": "post", "identityKeyGuess": "h:alice", "postId": "p1",
               "snapshot": {"t": 1_700_000_000, "views": 10}}),
        json!({"kind": "post", "identityKeyGuess": "h:alice", "postId": "p1",
               "snapshot": {"t": 1_700_000_600, "views": 25}}),
        json!({"kind": "profile", "identityKeyGuess": "h:alice", "id": "5",
               "followers": 300, "t": 1_700_000_000}),
        json!({"kind": "post", "identityKeyGuess": "c:bob", "postId": "p2",
               "snapshot": {"t": 1_700_000_000, "remix_count": 1}}),
    ];
    for line in lines {
        match serde_json::from_value::<IngestEvent>(line).expect("event") {
            IngestEvent::Post(obs) => {
                store.ingest_post(&obs, NOW).expect("post");
            }
            IngestEvent::Profile(obs) => {
                store.ingest_profile(&obs, NOW).expect("profile");
            }
        }
    }
    store.save_dirty().expect("save");
    store
}

#[test]
fn export_import_round_trip() {
    let mut source = populated();
    let bundle = source.export(NOW).expect("export");
    assert_eq!(bundle.version, EXPORT_VERSION);
    assert_eq!(bundle.users.len(), 2);

    let text = serde_json::to_string(&bundle).expect("serialize");
    let parsed: ExportBundle = serde_json::from_str(&text).expect("parse");

    let mut target = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    let report = target.import(parsed, NOW).expect("import");
    assert_eq!(report.users, 2);
    assert_eq!(report.posts, 2);

    let mut reopened =
        MetricsStore::open(target.into_backend(), StoreConfig::default()).expect("reopen");
    reopened.hydrate_all().expect("hydrate");
    assert_eq!(reopened.table().users, bundle.users);
}

#[test]
fn reimport_is_idempotent() {
    let mut store = populated();
    let bundle = store.export(NOW).expect("export");
    let before = store.table().clone();

    store.import(bundle.clone(), NOW).expect("first");
    store.import(bundle, NOW).expect("second");
    assert_eq!(store.table(), &before);
}

#[test]
fn newer_bundle_and_virtual_keys_are_refused() {
    let mut store = populated();
    let mut bundle = store.export(NOW).expect("export");
    bundle.version = EXPORT_VERSION + 1;
    let err = store.import(bundle, NOW).expect_err("newer");
    assert_eq!(err.code(), ErrorCode::CorruptRecord);

    let mut bundle = store.export(NOW).expect("export");
    bundle.users.insert(IdentityKey::TopToday, User::default());
    let report = store.import(bundle, NOW).expect("import");
    assert_eq!(report.skipped, vec![IdentityKey::TopToday]);
    assert!(store.table().get(&IdentityKey::TopToday).is_none());
}

#[test]
fn import_normalizes_unsorted_history_before_hot_write() {
    let bundle: ExportBundle = serde_json::from_value(json!({
        "version": EXPORT_VERSION,
        "exportedAt": NOW,
        "users": {
            "h:alice": {
                "handle": "alice",
                "posts": {
                    "p1": {"snapshots": [
                        {"t": 2_000_000_000_000_i64, "likes": 2},
                        {"t": 1_000_000_000, "likes": 1},
                        {"t": 2_000_000_000_000_i64, "likes": 1}
                    ]}
                }
            }
        }
    }))
    .expect("bundle");

    let mut store = MetricsStore::open(MemoryKv::new(), StoreConfig::default()).expect("open");
    store.import(bundle.clone(), NOW).expect("import");

    let entries = store.backend().entries();
    assert_eq!(
        entries[keys::METRICS]["users"]["h:alice"]["posts"]["p1"]["snapshots"],
        json!([{"t": 2_000_000_000_000_i64, "likes": 2}])
    );
    assert_eq!(
        entries["snapshots_h:alice"]["p1"],
        json!([
            {"t": 1_000_000_000_000_i64, "likes": 1},
            {"t": 2_000_000_000_000_i64, "likes": 2}
        ])
    );
    let hot_before = entries[keys::METRICS].clone();

    store.import(bundle, NOW).expect("reimport");
    assert_eq!(store.backend().entries()[keys::METRICS], hot_before);

    let reopened =
        MetricsStore::open(store.into_backend(), StoreConfig::default()).expect("reopen");
    let alice: IdentityKey = "h:alice".parse().expect("key");
    let latest = reopened.table().users[&alice].posts["p1"].latest_snapshot().copied();
    let mut expected = Snapshot::at(2_000_000_000_000);
    expected.likes = Some(2);
    assert_eq!(latest, Some(expected));
}
