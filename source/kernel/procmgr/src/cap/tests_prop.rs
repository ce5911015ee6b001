// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for capability grants
//! OWNERS: @kernel-cap-team
//! NOTE: Tests only; no kernel logic. Ensures grant bookkeeping is a set.
//!
//! TEST_SCOPE:
//!   - Grants are deduplicated regardless of order
//!   - Revocation removes exactly the named grantee
//!
//! TEST_SCENARIOS:
//!   - grants_behave_as_a_set(): arbitrary grant/revoke sequences match a BTreeSet model
//!   - revoke_only_touches_target(): other grantees survive a revoke

use super::Capability;
use crate::types::{CapabilityId, ProcessId};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::vec::Vec;

fn arb_ops() -> impl Strategy<Value = Vec<(bool, u64)>> {
    proptest::collection::vec((any::<bool>(), 1u64..16), 0..64)
}

proptest! {
    #[test]
    fn grants_behave_as_a_set(ops in arb_ops()) {
        let mut cap = Capability::new(CapabilityId::from_raw(1), "disk");
        let mut model = BTreeSet::new();
        for (grant, raw) in ops {
            let pid = ProcessId::from_raw(raw);
            if grant {
                prop_assert_eq!(cap.grant(pid), model.insert(raw));
            } else {
                prop_assert_eq!(cap.revoke(pid), model.remove(&raw));
            }
            prop_assert_eq!(cap.grantees.len(), model.len());
        }
        for raw in 1u64..16 {
            prop_assert_eq!(cap.is_granted(ProcessId::from_raw(raw)), model.contains(&raw));
        }
    }

    #[test]
    fn revoke_only_touches_target(pids in proptest::collection::btree_set(1u64..64, 1..16), pick in any::<usize>()) {
        let pids: Vec<u64> = pids.into_iter().collect();
        let mut cap = Capability::new(CapabilityId::from_raw(1), "net");
        for raw in &pids {
            cap.grant(ProcessId::from_raw(*raw));
        }
        let target = pids[pick % pids.len()];
        prop_assert!(cap.revoke(ProcessId::from_raw(target)));
        for raw in &pids {
            prop_assert_eq!(cap.is_granted(ProcessId::from_raw(*raw)), *raw != target);
        }
    }
}
