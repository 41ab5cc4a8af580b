#![no_main]

use libfuzzer_sys::fuzz_target;
use reelstats_core::merge::merge_snapshots;
use reelstats_core::model::Snapshot;
use serde_json::Value;

fn parse(value: &Value) -> Vec<Snapshot> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Snapshot::from_value).collect())
        .unwrap_or_default()
}

fuzz_target!(|data: &[u8]| {
    let Ok(Value::Array(halves)) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let [left, right] = halves.as_slice() else {
        return;
    };
    let a = parse(left);
    let b = parse(right);

    let ab = merge_snapshots(&a, &b);
    assert_eq!(ab, merge_snapshots(&b, &a));
    assert_eq!(merge_snapshots(&ab, &b), ab);
    assert!(ab.windows(2).all(|w| w[0].t < w[1].t));
});
