// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Collaborator contracts consumed by the process manager
//! OWNERS: @kernel-team
//! PUBLIC API: AddressSpaceOps, FrameAllocator, RegisterOps, FpuOps, NameStore, Timer, Platform
//! DEPENDS_ON: types, mm::StateBuffer, task::Permission
//! INVARIANTS: Implementations synchronise internally (all methods take &self);
//!             none of them calls back into the process manager
//!
//! The page-table engine, physical allocator, register/FPU save code, name/value store and
//! timer live outside this crate. Boot code wires concrete implementations into a
//! [`Platform`]; tests use [`fake`].

extern crate alloc;

use alloc::boxed::Box;
use bitflags::bitflags;
use core::num::NonZeroU32;

use crate::mm::StateBuffer;
use crate::task::Permission;
use crate::types::{CpuId, PhysAddr, VirtAddr};

#[cfg(test)]
pub mod fake;

/// Handle referencing an address space owned by the page-table engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsHandle(NonZeroU32);

impl AsHandle {
    /// Constructs a handle from its raw value; zero is not a handle.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub const fn to_raw(self) -> u32 {
        self.0.get()
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Permissions of a user mapping.
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const USER = 1 << 3;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Allocation hints for the frame allocator.
    pub struct FrameFlags: u32 {
        /// Frames are zero-filled before being handed out.
        const ZEROED = 1 << 0;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Timer capabilities requested when installing a handler.
    pub struct TimerFeatures: u32 {
        const PERIODIC = 1 << 0;
        /// Handler fires on every core, each with its own period.
        const PER_CPU = 1 << 1;
    }
}

/// Errors reported by the page-table engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressSpaceError {
    /// Handle was not recognised.
    InvalidHandle,
    /// No more address spaces can be created.
    Exhausted,
    /// Mapping overlaps an existing entry.
    Overlap,
    /// Range to unmap is not mapped.
    NotMapped,
    /// Address or length is not page aligned.
    Unaligned,
}

/// Errors reported by the physical frame allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    Exhausted,
    /// Length is zero or not a page multiple.
    InvalidLength,
}

/// Errors reported by the name/value store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    Exists,
    NotFound,
    Full,
}

/// Errors reported by the timer subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerError {
    /// Requested features are not available on this machine.
    Unsupported,
    /// A handler has already been installed.
    Busy,
}

/// Page-table engine.
pub trait AddressSpaceOps {
    fn create(&self) -> Result<AsHandle, AddressSpaceError>;
    /// Releases the address space; all user mappings must already be gone.
    fn destroy(&self, handle: AsHandle) -> Result<(), AddressSpaceError>;
    fn map(
        &self,
        handle: AsHandle,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        len: usize,
        flags: MapFlags,
    ) -> Result<(), AddressSpaceError>;
    fn unmap(&self, handle: AsHandle, vaddr: VirtAddr, len: usize) -> Result<(), AddressSpaceError>;
    /// Makes `handle` the active address space of the calling core.
    fn activate(&self, handle: AsHandle) -> Result<(), AddressSpaceError>;
    fn translate(&self, handle: AsHandle, vaddr: VirtAddr) -> Option<PhysAddr>;
}

/// Physical frame allocator.
pub trait FrameAllocator {
    fn alloc(&self, flags: FrameFlags, len: usize) -> Result<PhysAddr, FrameError>;
    fn free(&self, paddr: PhysAddr, len: usize);
}

/// General-register context of a suspended task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RegisterFrame {
    pub gpr: [usize; 31],
    pub sp: usize,
    pub pc: usize,
    pub kernel_mode: bool,
}

/// General-register save/restore.
pub trait RegisterOps {
    /// Fresh context that starts at `entry` on the stack ending at `stack_top`.
    fn default_state(&self, stack_top: usize, entry: VirtAddr, perms: Permission) -> RegisterFrame;
    /// Captures the interrupted context of the calling core into `frame`.
    fn save(&self, frame: &mut RegisterFrame);
    /// Loads `frame` as the context the calling core returns to.
    fn restore(&self, frame: &RegisterFrame);
}

/// Floating-point state save/restore.
pub trait FpuOps {
    fn state_size(&self) -> usize;
    fn state_align(&self) -> usize;
    fn save(&self, state: &mut StateBuffer);
    fn restore(&self, state: &StateBuffer);
}

/// Hierarchical name/value store keyed by `/`-separated UTF-8 paths.
pub trait NameStore {
    /// Creates directory `name` below `path` (the empty path is the root).
    fn create_dir(&self, path: &str, name: &str) -> Result<(), StoreError>;
    fn set(&self, path: &str, key: &str, value: u64) -> Result<(), StoreError>;
    fn get(&self, path: &str, key: &str) -> Result<u64, StoreError>;
    fn remove(&self, path: &str, key: &str) -> Result<(), StoreError>;
}

/// Handler invoked on every timer expiry with the id of the interrupted core.
pub type TickHandler = fn(CpuId);

/// Interrupt/timer subsystem.
pub trait Timer {
    fn request(
        &self,
        features: TimerFeatures,
        period_ns: u64,
        handler: TickHandler,
    ) -> Result<(), TimerError>;
    /// Monotonic time in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// The full set of collaborators the kernel is built over.
pub struct Platform {
    pub address_spaces: Box<dyn AddressSpaceOps + Send + Sync>,
    pub frames: Box<dyn FrameAllocator + Send + Sync>,
    pub registers: Box<dyn RegisterOps + Send + Sync>,
    pub fpu: Box<dyn FpuOps + Send + Sync>,
    pub names: Box<dyn NameStore + Send + Sync>,
    pub timer: Box<dyn Timer + Send + Sync>,
}
