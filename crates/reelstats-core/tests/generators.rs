use proptest::prelude::*;
use reelstats_core::model::{SeriesPoint, Snapshot};

/// Timestamps drawn from small pools so seconds and millis inputs collide
/// often, plus a few unusable values.
pub fn arb_timestamp() -> impl Strategy<Value = i64> {
    prop_oneof![
        4 => (0i64..20).prop_map(|n| 1_700_000_000 + n * 10),
        4 => (0i64..20).prop_map(|n| 1_700_000_000_000 + n * 10_000),
        1 => -3i64..=0,
    ]
}

pub fn arb_count() -> impl Strategy<Value = Option<u64>> {
    prop::option::of(0u64..10_000)
}

pub fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    (
        arb_timestamp(),
        arb_count(),
        arb_count(),
        arb_count(),
        arb_count(),
        arb_count(),
    )
        .prop_map(|(t, views, uv, likes, comments, remix_count)| Snapshot {
            t,
            views,
            uv,
            likes,
            comments,
            remix_count,
        })
}

pub fn arb_series() -> impl Strategy<Value = Vec<Snapshot>> {
    prop::collection::vec(arb_snapshot(), 0..24)
}

pub fn arb_points() -> impl Strategy<Value = Vec<SeriesPoint>> {
    prop::collection::vec(
        (arb_timestamp(), 0u64..1_000_000).prop_map(|(t, count)| SeriesPoint::new(t, count)),
        0..24,
    )
}
