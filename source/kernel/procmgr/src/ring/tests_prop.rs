// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the ring arena
//! OWNERS: @kernel-team
//! NOTE: Tests only; the ring is checked against a Vec model.
//!
//! TEST_SCOPE:
//!   - Insertion order is ring order
//!   - Arbitrary removals keep the cycle closed and the model in sync
//!
//! TEST_SCENARIOS:
//!   - matches_vec_model(): random insert/remove sequences mirror a Vec
//!   - next_and_prev_are_inverse(): walking forward then back returns to the start

use super::{Ring, SlotId};
use proptest::prelude::*;
use std::vec::Vec;

#[derive(Clone, Debug)]
enum Op {
    Insert(u16),
    Remove(usize),
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(
        prop_oneof![any::<u16>().prop_map(Op::Insert), any::<usize>().prop_map(Op::Remove)],
        0..64,
    )
}

proptest! {
    #[test]
    fn matches_vec_model(ops in arb_ops()) {
        let mut ring = Ring::new();
        let mut model: Vec<(SlotId, u16)> = Vec::new();
        for op in ops {
            match op {
                Op::Insert(value) => {
                    let id = ring.insert(value);
                    model.push((id, value));
                }
                Op::Remove(pick) => {
                    if model.is_empty() {
                        continue;
                    }
                    let (id, value) = model.remove(pick % model.len());
                    prop_assert_eq!(ring.remove(id), Some(value));
                    prop_assert_eq!(ring.get(id), None);
                }
            }
            prop_assert_eq!(ring.len(), model.len());
            let seen: Vec<u16> = ring.iter().map(|(_, v)| *v).collect();
            let expected: Vec<u16> = model.iter().map(|(_, v)| *v).collect();
            prop_assert_eq!(seen, expected);
        }
    }

    #[test]
    fn next_and_prev_are_inverse(count in 1usize..32, start in any::<usize>()) {
        let mut ring = Ring::new();
        let ids: Vec<SlotId> = (0..count).map(|i| ring.insert(i)).collect();
        let origin = ids[start % count];
        let mut cursor = origin;
        for _ in 0..count {
            let next = ring.next(cursor).unwrap();
            prop_assert_eq!(ring.prev(next), Some(cursor));
            cursor = next;
        }
        prop_assert_eq!(cursor, origin);
    }
}
