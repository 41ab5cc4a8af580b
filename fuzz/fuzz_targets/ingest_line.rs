#![no_main]

use libfuzzer_sys::fuzz_target;
use reelstats_core::ingest::IngestEvent;
use reelstats_core::kv::MemoryKv;
use reelstats_core::{MetricsStore, StoreConfig};

const NOW: i64 = 1_700_000_000_000;

fuzz_target!(|data: &[u8]| {
    let Ok(event) = serde_json::from_slice::<IngestEvent>(data) else {
        return;
    };
    let Ok(mut store) = MetricsStore::open(MemoryKv::new(), StoreConfig::default()) else {
        return;
    };
    let _ = match &event {
        IngestEvent::Post(obs) => store.ingest_post(obs, NOW),
        IngestEvent::Profile(obs) => store.ingest_profile(obs, NOW),
    };
    if store.save_dirty().is_err() {
        return;
    }
    let before = store.table().clone();

    let mut reopened = MetricsStore::open(store.into_backend(), StoreConfig::default())
        .expect("saved store reopens");
    reopened.hydrate_all().expect("saved shards decode");
    assert_eq!(reopened.table(), &before);
});
