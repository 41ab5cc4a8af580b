use proptest::prelude::*;
use reelstats_core::merge::{merge_series, merge_snapshots};
use reelstats_core::model::SNAPSHOT_NUMERIC_FIELDS;
use reelstats_core::model::snapshot::normalize_timestamp;

#[path = "generators.rs"]
mod generators;
use generators::*;

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn snapshots_reapply_is_idempotent(a in arb_series(), b in arb_series()) {
        let once = merge_snapshots(&a, &b);
        let twice = merge_snapshots(&once, &b);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn snapshots_commutative(a in arb_series(), b in arb_series()) {
        prop_assert_eq!(merge_snapshots(&a, &b), merge_snapshots(&b, &a));
    }

    #[test]
    fn snapshots_associative(a in arb_series(), b in arb_series(), c in arb_series()) {
        let left = merge_snapshots(&merge_snapshots(&a, &b), &c);
        let right = merge_snapshots(&a, &merge_snapshots(&b, &c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn snapshots_output_sorted_unique_and_normalized(a in arb_series(), b in arb_series()) {
        let merged = merge_snapshots(&a, &b);
        prop_assert!(merged.windows(2).all(|w| w[0].t < w[1].t));
        prop_assert!(merged.iter().all(|s| normalize_timestamp(s.t) == Some(s.t)));
    }

    #[test]
    fn snapshots_never_lose_observations(a in arb_series(), b in arb_series()) {
        let merged = merge_snapshots(&a, &b);
        for input in a.iter().chain(&b) {
            let Some(t) = normalize_timestamp(input.t) else { continue };
            let found = merged.iter().find(|s| s.t == t);
            prop_assert!(found.is_some(), "missing t={}", t);
            if let Some(out) = found {
                for metric in SNAPSHOT_NUMERIC_FIELDS {
                    if let Some(seen) = input.get(metric) {
                        prop_assert!(out.get(metric).is_some_and(|v| v >= seen));
                    }
                }
            }
        }
    }

    #[test]
    fn series_commutative_and_idempotent(a in arb_points(), b in arb_points()) {
        let ab = merge_series(&a, &b);
        prop_assert_eq!(&ab, &merge_series(&b, &a));
        prop_assert_eq!(&ab, &merge_series(&ab, &b));
    }
}
