// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: In-memory machine implementing every collaborator contract for host tests
//! OWNERS: @kernel-team
//! NOTE: Tests only. Frames are real host pages so data written through one mapping can be
//!       read back through another; failure injection covers frame exhaustion and map errors.

use std::boxed::Box;
use std::collections::{BTreeMap, BTreeSet};
use std::string::{String, ToString};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::vec::Vec;

use spin::Mutex;

use super::{
    AddressSpaceError, AddressSpaceOps, AsHandle, FpuOps, FrameAllocator, FrameError, FrameFlags,
    MapFlags, NameStore, Platform, RegisterFrame, RegisterOps, StoreError, TickHandler, Timer,
    TimerError, TimerFeatures,
};
use crate::mm::{StateBuffer, PAGE_SIZE};
use crate::task::Permission;
use crate::types::{CpuId, PhysAddr, VirtAddr};

const FRAME_BASE: usize = 0x8000_0000;

#[derive(Default)]
struct Frames {
    pages: BTreeMap<usize, Box<[u8; PAGE_SIZE]>>,
    next: usize,
    /// Remaining pages that may be handed out; `None` is unlimited.
    budget: Option<usize>,
    freed_pages: usize,
}

#[derive(Default)]
struct Space {
    pages: BTreeMap<usize, (PhysAddr, MapFlags)>,
}

#[derive(Default)]
struct Spaces {
    live: BTreeMap<u32, Space>,
    next: u32,
    /// Remaining map calls that succeed; `None` is unlimited.
    map_budget: Option<usize>,
    activations: Vec<AsHandle>,
    destroyed: Vec<AsHandle>,
}

#[derive(Default)]
struct Names {
    dirs: BTreeSet<String>,
    entries: BTreeMap<(String, String), u64>,
    capacity: Option<usize>,
    /// Directory creation fails with `Full`.
    dirs_full: bool,
}

struct InstalledTimer {
    features: TimerFeatures,
    period_ns: u64,
    handler: TickHandler,
}

/// Shared state of the fake machine; tests keep an `Arc` to inspect it.
#[derive(Default)]
pub struct FakeMachine {
    frames: Mutex<Frames>,
    spaces: Mutex<Spaces>,
    names: Mutex<Names>,
    timer: Mutex<Option<InstalledTimer>>,
    now: AtomicU64,
    register_saves: AtomicUsize,
    fpu_saves: AtomicUsize,
    fpu_restores: AtomicUsize,
    restored_pcs: Mutex<Vec<usize>>,
}

impl FakeMachine {
    pub fn new() -> Arc<Self> {
        let machine = Self::default();
        machine.frames.lock().next = FRAME_BASE;
        machine.spaces.lock().next = 1;
        Arc::new(machine)
    }

    /// Builds a platform whose collaborators all point at this machine.
    pub fn platform(self: &Arc<Self>) -> Platform {
        let handle = FakeHandle(Arc::clone(self));
        Platform {
            address_spaces: Box::new(handle.clone()),
            frames: Box::new(handle.clone()),
            registers: Box::new(handle.clone()),
            fpu: Box::new(handle.clone()),
            names: Box::new(handle.clone()),
            timer: Box::new(handle),
        }
    }

    // Failure injection.

    pub fn limit_frames(&self, pages: usize) {
        self.frames.lock().budget = Some(pages);
    }

    pub fn limit_maps(&self, calls: usize) {
        self.spaces.lock().map_budget = Some(calls);
    }

    pub fn limit_store_entries(&self, entries: usize) {
        self.names.lock().capacity = Some(entries);
    }

    pub fn reject_new_dirs(&self) {
        self.names.lock().dirs_full = true;
    }

    // Inspection.

    pub fn live_frames(&self) -> usize {
        self.frames.lock().pages.len()
    }

    pub fn freed_frames(&self) -> usize {
        self.frames.lock().freed_pages
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.lock().live.len()
    }

    pub fn destroyed_spaces(&self) -> Vec<AsHandle> {
        self.spaces.lock().destroyed.clone()
    }

    pub fn activations(&self) -> Vec<AsHandle> {
        self.spaces.lock().activations.clone()
    }

    pub fn mapped_pages(&self, handle: AsHandle) -> usize {
        self.spaces.lock().live.get(&handle.to_raw()).map_or(0, |space| space.pages.len())
    }

    pub fn mapping_flags(&self, handle: AsHandle, vaddr: VirtAddr) -> Option<MapFlags> {
        let spaces = self.spaces.lock();
        let space = spaces.live.get(&handle.to_raw())?;
        space.pages.get(&(vaddr.raw() / PAGE_SIZE)).map(|(_, flags)| *flags)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.names.lock().dirs.contains(path)
    }

    pub fn entry(&self, path: &str, key: &str) -> Option<u64> {
        self.names.lock().entries.get(&(path.to_string(), key.to_string())).copied()
    }

    pub fn register_saves(&self) -> usize {
        self.register_saves.load(Ordering::SeqCst)
    }

    pub fn fpu_saves(&self) -> usize {
        self.fpu_saves.load(Ordering::SeqCst)
    }

    pub fn fpu_restores(&self) -> usize {
        self.fpu_restores.load(Ordering::SeqCst)
    }

    /// Entry points of every context restored so far, in order.
    pub fn restored_pcs(&self) -> Vec<usize> {
        self.restored_pcs.lock().clone()
    }

    pub fn installed_timer(&self) -> Option<(TimerFeatures, u64)> {
        self.timer.lock().as_ref().map(|t| (t.features, t.period_ns))
    }

    /// Invokes the installed tick handler as the timer interrupt of `cpu` would.
    pub fn fire_tick(&self, cpu: CpuId) -> bool {
        let handler = self.timer.lock().as_ref().map(|t| t.handler);
        match handler {
            Some(handler) => {
                handler(cpu);
                true
            }
            None => false,
        }
    }

    pub fn set_now(&self, ns: u64) {
        self.now.store(ns, Ordering::SeqCst);
    }

    /// Writes `bytes` at `vaddr` through the translation of `handle`.
    pub fn write_user(&self, handle: AsHandle, vaddr: VirtAddr, bytes: &[u8]) -> bool {
        for (offset, byte) in bytes.iter().enumerate() {
            let Some(pa) = self.translate_raw(handle, vaddr.raw() + offset) else {
                return false;
            };
            let mut frames = self.frames.lock();
            let Some(page) = frames.pages.get_mut(&(pa & !(PAGE_SIZE - 1))) else {
                return false;
            };
            page[pa % PAGE_SIZE] = *byte;
        }
        true
    }

    /// Reads `len` bytes at `vaddr` through the translation of `handle`.
    pub fn read_user(&self, handle: AsHandle, vaddr: VirtAddr, len: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for offset in 0..len {
            let pa = self.translate_raw(handle, vaddr.raw() + offset)?;
            let frames = self.frames.lock();
            let page = frames.pages.get(&(pa & !(PAGE_SIZE - 1)))?;
            out.push(page[pa % PAGE_SIZE]);
        }
        Some(out)
    }

    fn translate_raw(&self, handle: AsHandle, va: usize) -> Option<usize> {
        let spaces = self.spaces.lock();
        let space = spaces.live.get(&handle.to_raw())?;
        let (pa, _) = space.pages.get(&(va / PAGE_SIZE))?;
        Some(pa.raw() + va % PAGE_SIZE)
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        let mut full = String::from(path);
        full.push('/');
        full.push_str(name);
        full
    }
}

/// Cloneable reference handed to the kernel as every collaborator.
#[derive(Clone)]
pub struct FakeHandle(Arc<FakeMachine>);

impl AddressSpaceOps for FakeHandle {
    fn create(&self) -> Result<AsHandle, AddressSpaceError> {
        let mut spaces = self.0.spaces.lock();
        let raw = spaces.next;
        spaces.next += 1;
        let handle = AsHandle::from_raw(raw).ok_or(AddressSpaceError::Exhausted)?;
        spaces.live.insert(raw, Space::default());
        Ok(handle)
    }

    fn destroy(&self, handle: AsHandle) -> Result<(), AddressSpaceError> {
        let mut spaces = self.0.spaces.lock();
        spaces.live.remove(&handle.to_raw()).ok_or(AddressSpaceError::InvalidHandle)?;
        spaces.destroyed.push(handle);
        Ok(())
    }

    fn map(
        &self,
        handle: AsHandle,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        len: usize,
        flags: MapFlags,
    ) -> Result<(), AddressSpaceError> {
        if vaddr.raw() % PAGE_SIZE != 0 || paddr.raw() % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(AddressSpaceError::Unaligned);
        }
        let mut spaces = self.0.spaces.lock();
        if let Some(budget) = spaces.map_budget.as_mut() {
            if *budget == 0 {
                return Err(AddressSpaceError::Exhausted);
            }
            *budget -= 1;
        }
        let space = spaces.live.get_mut(&handle.to_raw()).ok_or(AddressSpaceError::InvalidHandle)?;
        let first = vaddr.raw() / PAGE_SIZE;
        let count = len / PAGE_SIZE;
        if (first..first + count).any(|vpn| space.pages.contains_key(&vpn)) {
            return Err(AddressSpaceError::Overlap);
        }
        for i in 0..count {
            space.pages.insert(first + i, (PhysAddr::new(paddr.raw() + i * PAGE_SIZE), flags));
        }
        Ok(())
    }

    fn unmap(&self, handle: AsHandle, vaddr: VirtAddr, len: usize) -> Result<(), AddressSpaceError> {
        if vaddr.raw() % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(AddressSpaceError::Unaligned);
        }
        let mut spaces = self.0.spaces.lock();
        let space = spaces.live.get_mut(&handle.to_raw()).ok_or(AddressSpaceError::InvalidHandle)?;
        let first = vaddr.raw() / PAGE_SIZE;
        let count = len / PAGE_SIZE;
        if !(first..first + count).all(|vpn| space.pages.contains_key(&vpn)) {
            return Err(AddressSpaceError::NotMapped);
        }
        for vpn in first..first + count {
            space.pages.remove(&vpn);
        }
        Ok(())
    }

    fn activate(&self, handle: AsHandle) -> Result<(), AddressSpaceError> {
        let mut spaces = self.0.spaces.lock();
        if !spaces.live.contains_key(&handle.to_raw()) {
            return Err(AddressSpaceError::InvalidHandle);
        }
        spaces.activations.push(handle);
        Ok(())
    }

    fn translate(&self, handle: AsHandle, vaddr: VirtAddr) -> Option<PhysAddr> {
        self.0.translate_raw(handle, vaddr.raw()).map(PhysAddr::new)
    }
}

impl FrameAllocator for FakeHandle {
    fn alloc(&self, _flags: FrameFlags, len: usize) -> Result<PhysAddr, FrameError> {
        if len == 0 || len % PAGE_SIZE != 0 {
            return Err(FrameError::InvalidLength);
        }
        let count = len / PAGE_SIZE;
        let mut frames = self.0.frames.lock();
        if let Some(budget) = frames.budget.as_mut() {
            if *budget < count {
                return Err(FrameError::Exhausted);
            }
            *budget -= count;
        }
        let base = frames.next;
        frames.next += len;
        for i in 0..count {
            frames.pages.insert(base + i * PAGE_SIZE, Box::new([0u8; PAGE_SIZE]));
        }
        Ok(PhysAddr::new(base))
    }

    fn free(&self, paddr: PhysAddr, len: usize) {
        let mut frames = self.0.frames.lock();
        for i in 0..len / PAGE_SIZE {
            if frames.pages.remove(&(paddr.raw() + i * PAGE_SIZE)).is_some() {
                frames.freed_pages += 1;
            }
        }
    }
}

impl RegisterOps for FakeHandle {
    fn default_state(&self, stack_top: usize, entry: VirtAddr, perms: Permission) -> RegisterFrame {
        RegisterFrame {
            sp: stack_top,
            pc: entry.raw(),
            kernel_mode: perms == Permission::Kernel,
            ..RegisterFrame::default()
        }
    }

    fn save(&self, frame: &mut RegisterFrame) {
        self.0.register_saves.fetch_add(1, Ordering::SeqCst);
        frame.gpr[0] = frame.gpr[0].wrapping_add(1);
    }

    fn restore(&self, frame: &RegisterFrame) {
        self.0.restored_pcs.lock().push(frame.pc);
    }
}

impl FpuOps for FakeHandle {
    fn state_size(&self) -> usize {
        512
    }

    fn state_align(&self) -> usize {
        64
    }

    fn save(&self, state: &mut StateBuffer) {
        self.0.fpu_saves.fetch_add(1, Ordering::SeqCst);
        if let Some(first) = state.as_mut_slice().first_mut() {
            *first = first.wrapping_add(1);
        }
    }

    fn restore(&self, _state: &StateBuffer) {
        self.0.fpu_restores.fetch_add(1, Ordering::SeqCst);
    }
}

impl NameStore for FakeHandle {
    fn create_dir(&self, path: &str, name: &str) -> Result<(), StoreError> {
        let mut names = self.0.names.lock();
        if !path.is_empty() && !names.dirs.contains(path) {
            return Err(StoreError::NotFound);
        }
        if names.dirs_full {
            return Err(StoreError::Full);
        }
        if !names.dirs.insert(join(path, name)) {
            return Err(StoreError::Exists);
        }
        Ok(())
    }

    fn set(&self, path: &str, key: &str, value: u64) -> Result<(), StoreError> {
        let mut names = self.0.names.lock();
        if !names.dirs.contains(path) {
            return Err(StoreError::NotFound);
        }
        let slot = (path.to_string(), key.to_string());
        let full = names.capacity.is_some_and(|cap| names.entries.len() >= cap);
        if full && !names.entries.contains_key(&slot) {
            return Err(StoreError::Full);
        }
        names.entries.insert(slot, value);
        Ok(())
    }

    fn get(&self, path: &str, key: &str) -> Result<u64, StoreError> {
        let names = self.0.names.lock();
        names
            .entries
            .get(&(path.to_string(), key.to_string()))
            .copied()
            .ok_or(StoreError::NotFound)
    }

    fn remove(&self, path: &str, key: &str) -> Result<(), StoreError> {
        let mut names = self.0.names.lock();
        names
            .entries
            .remove(&(path.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

impl Timer for FakeHandle {
    fn request(
        &self,
        features: TimerFeatures,
        period_ns: u64,
        handler: TickHandler,
    ) -> Result<(), TimerError> {
        let mut timer = self.0.timer.lock();
        if timer.is_some() {
            return Err(TimerError::Busy);
        }
        *timer = Some(InstalledTimer { features, period_ns, handler });
        Ok(())
    }

    fn now_ns(&self) -> u64 {
        self.0.now.load(Ordering::SeqCst)
    }
}
