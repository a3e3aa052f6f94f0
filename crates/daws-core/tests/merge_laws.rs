// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the provenance merge laws.

use chrono::NaiveDate;
use daws_core::{ImplementationStatus, Provenance, ProvenanceMerge};
use proptest::prelude::*;

fn arb_status() -> impl Strategy<Value = ImplementationStatus> {
    prop_oneof![
        Just(ImplementationStatus::Real),
        Just(ImplementationStatus::Partial),
        Just(ImplementationStatus::Stub),
    ]
}

fn arb_provenance() -> impl Strategy<Value = Provenance> {
    (
        "[a-z_]{1,10}",
        proptest::option::of(0u32..3650),
        0u64..100_000,
        arb_status(),
    )
        .prop_map(|(source, day_offset, ttl, status)| {
            let base = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
            let as_of = day_offset.map(|d| base + chrono::Duration::days(i64::from(d)));
            Provenance::new(source, as_of, ttl, "PP1").status(status)
        })
}

fn merge(items: &[Provenance]) -> Provenance {
    let mut m = ProvenanceMerge::new();
    for p in items {
        m.absorb(p);
    }
    m.finish().expect("single-pack merge")
}

proptest! {
    #[test]
    fn merged_status_dominates_every_input(items in proptest::collection::vec(arb_provenance(), 1..8)) {
        let merged = merge(&items);
        for p in &items {
            prop_assert!(merged.status >= p.status);
        }
    }

    #[test]
    fn merged_ttl_is_the_minimum(items in proptest::collection::vec(arb_provenance(), 1..8)) {
        let merged = merge(&items);
        let min_ttl = items.iter().map(|p| p.ttl_seconds).min().unwrap();
        prop_assert_eq!(merged.ttl_seconds, min_ttl);
    }

    #[test]
    fn merged_as_of_is_the_minimum_with_unknown_minimal(
        items in proptest::collection::vec(arb_provenance(), 1..8),
    ) {
        let merged = merge(&items);
        if items.iter().any(|p| p.as_of.is_none()) {
            prop_assert_eq!(merged.as_of, None);
        } else {
            let min = items.iter().filter_map(|p| p.as_of).min();
            prop_assert_eq!(merged.as_of, min);
        }
    }

    #[test]
    fn merge_is_order_insensitive(
        mut items in proptest::collection::vec(arb_provenance(), 2..8),
    ) {
        let forward = merge(&items);
        items.reverse();
        let backward = merge(&items);
        prop_assert_eq!(forward.as_of, backward.as_of);
        prop_assert_eq!(forward.ttl_seconds, backward.ttl_seconds);
        prop_assert_eq!(forward.status, backward.status);
    }

    #[test]
    fn absorption_is_associative(
        items in proptest::collection::vec(arb_provenance(), 3..8),
        split in 1usize..2,
    ) {
        // Merging a prefix-merge with the remaining tail must equal the flat
        // merge (up to source ordering and computed_at).
        let split = split.min(items.len() - 1);
        let head = merge(&items[..split]);
        let mut m = ProvenanceMerge::new();
        m.absorb(&head);
        for p in &items[split..] {
            m.absorb(p);
        }
        let nested = m.finish().unwrap();
        let flat = merge(&items);
        prop_assert_eq!(nested.as_of, flat.as_of);
        prop_assert_eq!(nested.ttl_seconds, flat.ttl_seconds);
        prop_assert_eq!(nested.status, flat.status);
    }
}
