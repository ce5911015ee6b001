// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel-wide identifier allocator shared by tasks, processes, pipes and capabilities.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::types::{CapabilityId, PipeId, ProcessId, TaskId};

/// Monotonic counter; raw value 0 is reserved for "none".
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Starts the counter at `first`.
    #[cfg(test)]
    pub(crate) const fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(if first == 0 { 1 } else { first }) }
    }

    /// Hands out the next raw id without taking any lock.
    ///
    /// The counter saturates at `u64::MAX`, which is never handed out; once reached every
    /// call fails with `OutOfMemory`.
    pub fn allocate(&self) -> Result<u64> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |raw| {
                if raw == u64::MAX {
                    None
                } else {
                    Some(raw + 1)
                }
            })
            .map_err(|_| Error::OutOfMemory)
    }

    pub fn task(&self) -> Result<TaskId> {
        self.allocate().map(TaskId::from_raw)
    }

    pub fn process(&self) -> Result<ProcessId> {
        self.allocate().map(ProcessId::from_raw)
    }

    pub fn pipe(&self) -> Result<PipeId> {
        self.allocate().map(PipeId::from_raw)
    }

    pub fn capability(&self) -> Result<CapabilityId> {
        self.allocate().map(CapabilityId::from_raw)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
