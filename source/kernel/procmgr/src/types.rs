// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes shared by the task, process, capability and pipe layers
//! OWNERS: @kernel-team
//! PUBLIC API: TaskId, ProcessId, PipeId, CapabilityId, CpuId, VirtAddr, PhysAddr, MAX_CPUS
//! DEPENDS_ON: mm::PAGE_SIZE
//! INVARIANTS: Raw id 0 never names a live object; ids of different kinds never mix
//!
//! All four object kinds draw from one counter (see `ids`), so two ids of different
//! kinds are never numerically equal either. The newtypes exist to stop a process id
//! being handed to a task lookup by accident.

use core::fmt;

use crate::mm::PAGE_SIZE;

/// Fixed CPU ceiling; per-core state is a bounded array of this size.
pub const MAX_CPUS: usize = 8;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates an id from a raw value (kernel-internal or ABI decode).
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw id value.
            #[inline]
            pub const fn as_raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

object_id!(
    /// Identifier of an execution context.
    TaskId
);
object_id!(
    /// Identifier of a resource-owning process.
    ProcessId
);
object_id!(
    /// Identifier of a pipe record; doubles as the local pipe handle.
    PipeId
);
object_id!(
    /// Identifier of a capability token.
    CapabilityId
);

/// Logical CPU identifier used by the scheduler and per-core state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    pub const BOOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Returns true when the id addresses a slot of the per-core table.
    #[inline]
    pub const fn is_valid(self) -> bool {
        (self.0 as usize) < MAX_CPUS
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Virtual address inside some address space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub fn page_aligned(addr: usize) -> Option<Self> {
        if addr % PAGE_SIZE == 0 {
            Some(Self(addr))
        } else {
            None
        }
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Physical address as handed out by the frame allocator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_bounds() {
        assert!(CpuId::BOOT.is_valid());
        assert!(CpuId::from_raw((MAX_CPUS - 1) as u16).is_valid());
        assert!(!CpuId::from_raw(MAX_CPUS as u16).is_valid());
    }

    #[test]
    fn page_alignment() {
        assert_eq!(VirtAddr::page_aligned(PAGE_SIZE * 3), Some(VirtAddr::new(PAGE_SIZE * 3)));
        assert_eq!(VirtAddr::page_aligned(PAGE_SIZE + 1), None);
        assert_eq!(VirtAddr::new(usize::MAX).checked_add(1), None);
    }
}
