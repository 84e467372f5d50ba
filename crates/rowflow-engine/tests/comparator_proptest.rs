//! Property tests for interval ordering and dimension cache lookups.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use rowflow_engine::dimension::{compare_intervals, DimensionCache, PreloadedIndex};
use rowflow_state::InMemoryDimensionStore;
use rowflow_types::{DimensionEntry, Value};

type Interval = (Option<NaiveDateTime>, Option<NaiveDateTime>);

fn day(n: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + chrono::Duration::days(n)
}

fn bound() -> impl Strategy<Value = Option<NaiveDateTime>> {
    prop::option::of((0i64..20).prop_map(day))
}

fn interval() -> impl Strategy<Value = Interval> {
    (bound(), bound())
}

/// Per key: sorted distinct cut days, whether the first version is open
/// towards the past and whether the last one is open towards the future.
fn history() -> impl Strategy<Value = Vec<(i64, Vec<i64>, bool, bool)>> {
    prop::collection::vec(
        (
            0i64..4,
            prop::collection::btree_set(0i64..60, 1..6),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(key, cuts, open_start, open_end)| {
                (key, cuts.into_iter().collect::<Vec<_>>(), open_start, open_end)
            }),
        0..4,
    )
}

fn entries_from(history: &[(i64, Vec<i64>, bool, bool)]) -> Vec<DimensionEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut entries = Vec::new();
    let mut next_id = 1;
    for (key, cuts, open_start, open_end) in history {
        if !seen.insert(*key) {
            continue;
        }
        let mut bounds: Vec<Option<NaiveDateTime>> = cuts.iter().map(|d| Some(day(*d))).collect();
        if *open_start {
            bounds.insert(0, None);
        }
        if *open_end {
            bounds.push(None);
        }
        for pair in bounds.windows(2) {
            entries.push(DimensionEntry::new(
                vec![Value::Integer(*key)],
                next_id,
                pair[0],
                pair[1],
            ));
            next_id += 1;
        }
    }
    entries
}

proptest! {
    #[test]
    fn prop_compare_is_reflexive(a in interval()) {
        prop_assert_eq!(compare_intervals(a, a), Ordering::Equal);
    }

    #[test]
    fn prop_compare_is_antisymmetric(a in interval(), b in interval()) {
        prop_assert_eq!(compare_intervals(a, b), compare_intervals(b, a).reverse());
    }

    #[test]
    fn prop_compare_is_transitive(a in interval(), b in interval(), c in interval()) {
        let mut sorted = [a, b, c];
        sorted.sort_by(|x, y| compare_intervals(*x, *y));
        prop_assert_ne!(compare_intervals(sorted[0], sorted[1]), Ordering::Greater);
        prop_assert_ne!(compare_intervals(sorted[1], sorted[2]), Ordering::Greater);
        prop_assert_ne!(compare_intervals(sorted[0], sorted[2]), Ordering::Greater);
    }

    #[test]
    fn prop_open_start_sorts_before_any_bounded_start(a in interval(), from in 0i64..20) {
        let open = (None, a.1);
        let bounded = (Some(day(from)), a.1);
        prop_assert_eq!(compare_intervals(open, bounded), Ordering::Less);
    }

    #[test]
    fn prop_open_end_sorts_after_any_bounded_end(from in bound(), to in 0i64..20) {
        prop_assert_eq!(
            compare_intervals((from, None), (from, Some(day(to)))),
            Ordering::Greater
        );
    }

    #[test]
    fn prop_cache_modes_agree_with_linear_scan(
        history in history(),
        queries in prop::collection::vec((0i64..5, 0i64..70), 1..40),
        cache_size in prop::option::of(1usize..4),
    ) {
        let entries = entries_from(&history);
        let store = Arc::new(InMemoryDimensionStore::new(1, entries.clone()).unwrap());
        let mut lazy = DimensionCache::lazy(store, -1, cache_size);
        let mut preloaded = DimensionCache::preloaded(
            Arc::new(PreloadedIndex::from_entries(entries.clone())),
            -1,
        );

        for (key, d) in queries {
            let natural_key = [Value::Integer(key)];
            let as_of = day(d);
            let expected = entries
                .iter()
                .find(|e| e.natural_key == natural_key && e.contains(as_of))
                .map_or(-1, |e| e.surrogate_id);
            prop_assert_eq!(lazy.lookup(&natural_key, as_of).unwrap(), expected);
            prop_assert_eq!(preloaded.lookup(&natural_key, as_of).unwrap(), expected);
        }
    }
}

#[test]
fn test_documented_null_placement() {
    let d = day;
    assert_eq!(
        compare_intervals((Some(d(2)), Some(d(4))), (Some(d(2)), None)),
        Ordering::Less
    );
    assert_eq!(
        compare_intervals((None, Some(d(4))), (Some(d(3)), None)),
        Ordering::Less
    );
    assert_eq!(
        compare_intervals((None, Some(d(5))), (Some(d(1)), Some(d(5)))),
        Ordering::Less
    );
    assert_eq!(
        compare_intervals((Some(d(1)), None), (Some(d(1)), Some(d(9)))),
        Ordering::Greater
    );
    assert_eq!(compare_intervals((None, None), (None, None)), Ordering::Equal);
    assert_eq!(
        compare_intervals((Some(d(2)), Some(d(3))), (Some(d(1)), None)),
        Ordering::Greater
    );
}
