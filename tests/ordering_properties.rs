//! Property-based tests for ordering, merging and partitioning invariants.

#![allow(clippy::unwrap_used)]

use std::cell::Cell;
use std::cmp::Ordering;

use proptest::prelude::*;

use chronorust_rs::keys::{compare_entity, pseudo_entity_id};
use chronorust_rs::{collect_left_outer_zip, EventKey, PartitionKey, Partitioner, StateKey};

/// Generates an optional timestamp from a small range so ties are common.
fn arb_bound() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(-5i64..5)
}

fn arb_partition_key() -> impl Strategy<Value = PartitionKey> {
    (
        prop::sample::select(vec!["dewiki", "enwiki"]),
        -3i64..3,
        prop::sample::select(vec![i32::MIN, 2004, 2010]),
    )
        .prop_map(|(domain, id, year)| PartitionKey::new(domain, id, year))
}

fn arb_state_key() -> impl Strategy<Value = StateKey> {
    (arb_partition_key(), arb_bound(), arb_bound())
        .prop_map(|(partition, start, end)| StateKey {
            partition,
            start,
            end,
        })
}

fn arb_event_key() -> impl Strategy<Value = EventKey> {
    (arb_partition_key(), arb_bound(), prop::option::of(0i64..3)).prop_map(
        |(partition, timestamp, tie_break)| EventKey {
            partition,
            timestamp,
            tie_break,
        },
    )
}

fn check_total_order<T: Ord + std::fmt::Debug>(a: &T, b: &T, c: &T) {
    assert_eq!(a.cmp(a), Ordering::Equal);
    assert_eq!(a.cmp(b), b.cmp(a).reverse());
    if a <= b && b <= c {
        assert!(a <= c, "{a:?} <= {b:?} <= {c:?} but not {a:?} <= {c:?}");
    }
    if a.cmp(b) == Ordering::Equal {
        assert_eq!(a, b);
    }
}

proptest! {
    #[test]
    fn state_key_is_total_order(a in arb_state_key(), b in arb_state_key(), c in arb_state_key()) {
        check_total_order(&a, &b, &c);
    }

    #[test]
    fn event_key_is_total_order(a in arb_event_key(), b in arb_event_key(), c in arb_event_key()) {
        check_total_order(&a, &b, &c);
    }

    #[test]
    fn absent_bounds_sort_as_open(partition in arb_partition_key(), start in -5i64..5, end in -5i64..5) {
        let open_start = StateKey { partition: partition.clone(), start: None, end: Some(end) };
        let closed_start = StateKey { partition: partition.clone(), start: Some(start), end: Some(end) };
        prop_assert!(open_start < closed_start);

        let open_end = StateKey { partition: partition.clone(), start: Some(start), end: None };
        let closed_end = StateKey { partition, start: Some(start), end: Some(end) };
        prop_assert!(closed_end < open_end);
    }

    #[test]
    fn zip_emits_each_left_once_with_linear_comparisons(
        mut left in prop::collection::vec(0i32..50, 0..60),
        mut right in prop::collection::vec(0i32..50, 0..60),
    ) {
        left.sort_unstable();
        right.sort_unstable();
        let comparisons = Cell::new(0usize);
        let out = collect_left_outer_zip(
            |a: &i32, b: &i32| {
                comparisons.set(comparisons.get() + 1);
                a.cmp(b)
            },
            |l: (i32, usize), r: Option<&(i32, usize)>| (l, r.copied()),
            left.iter().enumerate().map(|(i, k)| (*k, i)),
            right.iter().enumerate().map(|(i, k)| (*k, i)),
        )
        .unwrap();

        prop_assert_eq!(out.len(), left.len());
        for (position, ((key, index), matched)) in out.iter().enumerate() {
            prop_assert_eq!(*index, position);
            match matched {
                Some((right_key, _)) => prop_assert_eq!(right_key, key),
                None => prop_assert!(!right.contains(key)),
            }
        }
        prop_assert!(comparisons.get() <= 3 * (left.len() + right.len()) + 1);
    }

    #[test]
    fn zip_rejects_unsorted_right(mut right in prop::collection::vec(0i32..50, 2..20)) {
        right.sort_unstable();
        right.dedup();
        prop_assume!(right.len() >= 2);
        right.reverse();
        let result = collect_left_outer_zip(
            |a: &i32, b: &i32| a.cmp(b),
            |l: (i32, ()), _r: Option<&(i32, ())>| l.0,
            vec![(i32::MAX, ())],
            right.into_iter().map(|k| (k, ())),
        );
        prop_assert!(result.is_err());
    }

    #[test]
    fn partition_ignores_time_component(
        key in arb_partition_key(),
        other_year in any::<i32>(),
        count in 1usize..64,
    ) {
        let partitioner = Partitioner::new(count).unwrap();
        let moved = PartitionKey { year_bucket: other_year, ..key.clone() };
        prop_assert_eq!(partitioner.partition(&key), partitioner.partition(&moved));
        prop_assert!(partitioner.partition(&key) < count);
        prop_assert_eq!(compare_entity(&key, &moved), Ordering::Equal);
    }

    #[test]
    fn pseudo_ids_are_negative_and_stable(record in "[a-z ]{0,40}", count in 1usize..32) {
        let id = pseudo_entity_id(&record);
        prop_assert!(id < 0);
        prop_assert_eq!(id, pseudo_entity_id(&record.clone()));

        let partitioner = Partitioner::new(count).unwrap();
        let early = PartitionKey::new("enwiki", id, 2001);
        let late = PartitionKey::new("enwiki", id, 2020);
        prop_assert_eq!(partitioner.partition(&early), partitioner.partition(&late));
    }
}
