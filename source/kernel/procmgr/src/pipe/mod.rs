// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Capability-gated two-party shared-memory pipes
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! PUBLIC API: Pipe, PipeFlags, parse_path, Kernel::{create_pipe,open_pipe,close_pipe}
//! DEPENDS_ON: process::ProcessStore, cap, hal::{FrameAllocator,AddressSpaceOps,NameStore}
//! INVARIANTS: A pipe is deleted exactly when both its owner and user slots are empty;
//!             backing pages are allocated on first open and freed only on deletion;
//!             every operation runs under the Process Store lock for its full duration
//!
//! A pipe is registered in the name store as `procs/<owner>/<pipe>` with its id as the
//! value, so peers find it by path. The owner maps it read-write; the peer maps it
//! read-write unless the pipe was created with `PEER_READ_ONLY`.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, info, warn};

use crate::cap;
use crate::error::{Error, Result};
use crate::hal::{AsHandle, FrameFlags, MapFlags, StoreError};
use crate::kernel::Kernel;
use crate::mm::{page_span, pages_for, PAGE_SIZE};
use crate::process::{process_dir, LocalPipe, ProcessInner, PROCS_DIR};
use crate::types::{CpuId, PhysAddr, PipeId, ProcessId, VirtAddr};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Pipe creation flags.
    pub struct PipeFlags: u32 {
        /// Any process may attach as peer. Set exactly when no capability is named.
        const NO_CAPABILITY = 1 << 0;
        /// The peer mapping is read-only.
        const PEER_READ_ONLY = 1 << 1;
    }
}

/// Pipe record kept in the kernel registry.
#[derive(Debug)]
pub struct Pipe {
    pub id: PipeId,
    pub name: String,
    pub owner_name: String,
    pub owner: Option<ProcessId>,
    /// Peer slot.
    pub user: Option<ProcessId>,
    pub capability: Option<String>,
    pub flags: PipeFlags,
    pub size: usize,
    pub pages: Option<Vec<PhysAddr>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Owner,
    Peer,
}

/// Splits `procs/<owner>/<pipe>` into its two names.
pub fn parse_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(PROCS_DIR)?.strip_prefix('/')?;
    let (owner, pipe) = rest.split_once('/')?;
    if owner.is_empty() || pipe.is_empty() || pipe.contains('/') {
        return None;
    }
    Some((owner, pipe))
}

impl Kernel {
    /// Registers a pipe in the caller's directory without allocating its pages.
    pub fn create_pipe(
        &self,
        cpu: CpuId,
        name: &str,
        capability: Option<&str>,
        size: usize,
        flags: PipeFlags,
    ) -> Result<PipeId> {
        self.validate_name(name)?;
        if size == 0 || size > self.config.max_pipe_size {
            return Err(Error::InvalidArgument);
        }
        let caller = self.caller(cpu)?;
        let mut procs = self.procs.lock();
        let process = procs.get(caller.pid).ok_or(Error::UnknownProcess)?;
        if let Some(required) = capability {
            if cap::find(&process.inner.lock().capabilities, required).is_none() {
                return Err(Error::UnknownCapability);
            }
        }
        let owner_name = String::from(process.name());
        let dir = process_dir(&owner_name);
        match self.platform.names.get(&dir, name) {
            Ok(_) => return Err(Error::AlreadyExists),
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
        let id = self.ids.pipe()?;
        let mut flags = flags;
        flags.set(PipeFlags::NO_CAPABILITY, capability.is_none());
        self.platform.names.set(&dir, name, id.as_raw())?;
        procs.pipes.insert(
            id,
            Pipe {
                id,
                name: String::from(name),
                owner_name,
                owner: Some(caller.pid),
                user: None,
                capability: capability.map(String::from),
                flags,
                size,
                pages: None,
            },
        );
        info!(target: "pipe", "process {} created pipe {id} '{dir}/{name}' ({size} bytes)", caller.pid);
        Ok(id)
    }

    /// Attaches the caller to the pipe at `path` and maps it.
    ///
    /// Returns the base of the mapping, which spans `size` rounded up to whole pages.
    pub fn open_pipe(&self, cpu: CpuId, path: &str) -> Result<(VirtAddr, PipeId)> {
        let (owner_name, pipe_name) = parse_path(path).ok_or(Error::UnknownPipe)?;
        let caller = self.caller(cpu)?;
        let mut guard = self.procs.lock();
        let procs = &mut *guard;

        let id = match self.platform.names.get(&process_dir(owner_name), pipe_name) {
            Ok(raw) => PipeId::from_raw(raw),
            Err(StoreError::NotFound) => return Err(Error::UnknownPipe),
            Err(err) => return Err(err.into()),
        };
        let caller_slot = procs.find(caller.pid).ok_or(Error::UnknownProcess)?;
        let pipe = procs.pipes.get(&id).ok_or(Error::UnknownPipe)?;
        let process = procs.ring.get(caller_slot).ok_or(Error::UnknownProcess)?;
        if process.inner.lock().pipes.iter().any(|local| local.pipe == id) {
            return Err(Error::Busy);
        }

        let side = if pipe.owner == Some(caller.pid) {
            Side::Owner
        } else if pipe.user.is_none() {
            let owner_pid = pipe.owner.ok_or(Error::Deleted)?;
            if !pipe.flags.contains(PipeFlags::NO_CAPABILITY) {
                let required = pipe.capability.as_deref().ok_or(Error::Unauthorized)?;
                let owner = procs.get(owner_pid).ok_or(Error::Deleted)?;
                if !cap::granted(owner, required, caller.pid) {
                    debug!(target: "pipe", "process {} lacks '{required}' for {path}", caller.pid);
                    return Err(Error::Unauthorized);
                }
            }
            Side::Peer
        } else if pipe.owner.is_none() {
            return Err(Error::Deleted);
        } else {
            return Err(Error::Busy);
        };

        let pipe = procs.pipes.get_mut(&id).ok_or(Error::UnknownPipe)?;
        let fresh = pipe.pages.is_none();
        if fresh {
            pipe.pages = Some(self.alloc_pages(pages_for(pipe.size))?);
        }
        let perms = match side {
            Side::Peer if pipe.flags.contains(PipeFlags::PEER_READ_ONLY) => MapFlags::READ | MapFlags::USER,
            _ => MapFlags::READ | MapFlags::WRITE | MapFlags::USER,
        };
        let process = procs.ring.get(caller_slot).ok_or(Error::UnknownProcess)?;
        let mut inner = process.inner.lock();
        let pages = pipe.pages.as_deref().unwrap_or(&[]);
        let len = page_span(pipe.size);
        let base = match self.map_pages(process.address_space(), &mut inner, pages, perms) {
            Ok(base) => base,
            Err(err) => {
                if fresh {
                    if let Some(pages) = pipe.pages.take() {
                        self.free_pages(&pages);
                    }
                }
                return Err(err);
            }
        };
        inner.pipes.push(LocalPipe {
            pipe: id,
            owner_name: String::from(owner_name),
            pipe_name: String::from(pipe_name),
            base,
            len,
        });
        if side == Side::Peer {
            pipe.user = Some(caller.pid);
        }
        info!(target: "pipe", "process {} opened {path} as {side:?} at {base}", caller.pid);
        Ok((base, id))
    }

    /// Detaches the caller from `id`, deleting the pipe once both sides are gone.
    pub fn close_pipe(&self, cpu: CpuId, id: PipeId) -> Result<()> {
        let caller = self.caller(cpu)?;
        let mut guard = self.procs.lock();
        let procs = &mut *guard;
        let slot = procs.find(caller.pid).ok_or(Error::UnknownProcess)?;
        let process = procs.ring.get(slot).ok_or(Error::UnknownProcess)?;
        let local = {
            let mut inner = process.inner.lock();
            let index = inner.pipes.iter().position(|local| local.pipe == id).ok_or(Error::UnknownPipe)?;
            inner.pipes.remove(index)
        };
        if let Err(err) = self.platform.address_spaces.unmap(process.address_space(), local.base, local.len) {
            warn!(target: "pipe", "unmap of pipe {id} in process {} failed: {err:?}", caller.pid);
        }
        self.release_pipe_end(&mut procs.pipes, caller.pid, id);
        debug!(target: "pipe", "process {} closed pipe {id}", caller.pid);
        Ok(())
    }

    /// Clears the slot `pid` holds in pipe `id` and deletes the pipe if both are empty.
    pub(crate) fn release_pipe_end(&self, pipes: &mut BTreeMap<PipeId, Pipe>, pid: ProcessId, id: PipeId) {
        let Some(pipe) = pipes.get_mut(&id) else {
            panic!("process {pid} held a descriptor for missing pipe {id}");
        };
        if pipe.owner == Some(pid) {
            pipe.owner = None;
        } else if pipe.user == Some(pid) {
            pipe.user = None;
        }
        if pipe.owner.is_none() && pipe.user.is_none() {
            if let Some(pipe) = pipes.remove(&id) {
                self.delete_pipe(pipe);
            }
        }
    }

    fn delete_pipe(&self, pipe: Pipe) {
        if let Some(pages) = pipe.pages.as_deref() {
            self.free_pages(pages);
        }
        let dir = process_dir(&pipe.owner_name);
        if let Err(err) = self.platform.names.remove(&dir, &pipe.name) {
            warn!(target: "pipe", "registry entry {dir}/{} already gone: {err:?}", pipe.name);
        }
        info!(target: "pipe", "pipe {} '{dir}/{}' deleted", pipe.id, pipe.name);
    }

    /// Allocates `count` single pages; all or nothing.
    fn alloc_pages(&self, count: usize) -> Result<Vec<PhysAddr>> {
        let mut pages = Vec::new();
        pages.try_reserve_exact(count).map_err(|_| Error::OutOfMemory)?;
        for _ in 0..count {
            match self.platform.frames.alloc(FrameFlags::ZEROED, PAGE_SIZE) {
                Ok(page) => pages.push(page),
                Err(err) => {
                    self.free_pages(&pages);
                    return Err(err.into());
                }
            }
        }
        Ok(pages)
    }

    fn free_pages(&self, pages: &[PhysAddr]) {
        for page in pages {
            self.platform.frames.free(*page, PAGE_SIZE);
        }
    }

    /// Maps `pages` at the process IPC cursor and advances it; all or nothing.
    fn map_pages(
        &self,
        handle: AsHandle,
        inner: &mut ProcessInner,
        pages: &[PhysAddr],
        perms: MapFlags,
    ) -> Result<VirtAddr> {
        let base = inner.ipc_cursor;
        let len = pages.len() * PAGE_SIZE;
        let end = base
            .raw()
            .checked_add(len)
            .filter(|end| *end <= self.config.ipc_window_end())
            .ok_or(Error::OutOfMemory)?;
        for (index, page) in pages.iter().enumerate() {
            let vaddr = VirtAddr::new(base.raw() + index * PAGE_SIZE);
            if let Err(err) = self.platform.address_spaces.map(handle, vaddr, *page, PAGE_SIZE, perms) {
                if index > 0 {
                    if let Err(undo) = self.platform.address_spaces.unmap(handle, base, index * PAGE_SIZE) {
                        warn!(target: "pipe", "rollback unmap at {base} failed: {undo:?}");
                    }
                }
                return Err(err.into());
            }
        }
        inner.ipc_cursor = VirtAddr::new(end);
        Ok(base)
    }
}
