// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process store: resource-owning units and their teardown
//! OWNERS: @kernel-team
//! PUBLIC API: Process, ProcessInfo, ProcessStore, LocalPipe, Kernel::process_info
//! DEPENDS_ON: ring::Ring, cap::Capability, pipe::Pipe, hal::{AddressSpaceOps,NameStore}
//! INVARIANTS: Process names are unique among live processes; the kernel process is never torn down;
//!             one process lock covers live_tasks, ipc_cursor, capabilities and pipes together

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use log::{info, warn};
use spin::Mutex;

use crate::cap::Capability;
use crate::error::{Error, Result};
use crate::hal::AsHandle;
use crate::kernel::Kernel;
use crate::pipe::Pipe;
use crate::ring::{Ring, SlotId};
use crate::types::{PipeId, ProcessId, VirtAddr};

/// Root directory of per-process entries in the name store.
pub const PROCS_DIR: &str = "procs";

/// Name-store directory of process `name`.
pub fn process_dir(name: &str) -> String {
    let mut path = String::with_capacity(PROCS_DIR.len() + 1 + name.len());
    path.push_str(PROCS_DIR);
    path.push('/');
    path.push_str(name);
    path
}

/// A pipe end attached to a process, and where it is mapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPipe {
    pub pipe: PipeId,
    pub owner_name: String,
    pub pipe_name: String,
    pub base: VirtAddr,
    pub len: usize,
}

pub(crate) struct ProcessInner {
    pub live_tasks: usize,
    /// Next free address of the IPC window; never moves backwards.
    pub ipc_cursor: VirtAddr,
    pub capabilities: Vec<Capability>,
    pub pipes: Vec<LocalPipe>,
}

/// Unit of resource ownership.
pub struct Process {
    id: ProcessId,
    name: String,
    address_space: AsHandle,
    pub(crate) inner: Mutex<ProcessInner>,
}

impl Process {
    pub(crate) fn new(id: ProcessId, name: &str, address_space: AsHandle, ipc_base: usize) -> Self {
        Self {
            id,
            name: String::from(name),
            address_space,
            inner: Mutex::new(ProcessInner {
                live_tasks: 0,
                ipc_cursor: VirtAddr::new(ipc_base),
                capabilities: Vec::new(),
                pipes: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address_space(&self) -> AsHandle {
        self.address_space
    }
}

/// Point-in-time view of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub name: String,
    pub address_space: AsHandle,
    pub live_tasks: usize,
    pub ipc_cursor: VirtAddr,
    pub capabilities: Vec<String>,
    pub pipes: Vec<LocalPipe>,
}

/// All processes plus the pipe registry; one lock covers both.
pub struct ProcessStore {
    pub(crate) ring: Ring<Process>,
    pub(crate) pipes: BTreeMap<PipeId, Pipe>,
}

impl ProcessStore {
    pub const fn new() -> Self {
        Self { ring: Ring::new(), pipes: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn find(&self, id: ProcessId) -> Option<SlotId> {
        self.ring.find(|process| process.id == id)
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process> {
        self.find(id).and_then(|slot| self.ring.get(slot))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Process> {
        self.ring.find(|process| process.name == name).and_then(|slot| self.ring.get(slot))
    }
}

impl Default for ProcessStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Creates a process with one live task reference.
    pub(crate) fn spawn_process(&self, procs: &mut ProcessStore, name: &str) -> Result<ProcessId> {
        if procs.find_by_name(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        let address_space = self.platform.address_spaces.create()?;
        let registered = self.ids.process().and_then(|pid| {
            self.ensure_dir(PROCS_DIR, name)?;
            Ok(pid)
        });
        let pid = match registered {
            Ok(pid) => pid,
            Err(err) => {
                if let Err(destroy) = self.platform.address_spaces.destroy(address_space) {
                    warn!(target: "proc", "leaking address space {address_space:?}: {destroy:?}");
                }
                return Err(err);
            }
        };
        let process = Process::new(pid, name, address_space, self.config.ipc_window_base);
        process.inner.lock().live_tasks = 1;
        procs.ring.insert(process);
        info!(target: "proc", "created process {pid} '{name}'");
        Ok(pid)
    }

    /// Creates a name-store directory, accepting one that already exists.
    pub(crate) fn ensure_dir(&self, path: &str, name: &str) -> Result<()> {
        match self.platform.names.create_dir(path, name) {
            Ok(()) | Err(crate::hal::StoreError::Exists) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Drops one task reference of `pid`, tearing the process down at zero.
    pub(crate) fn release_task(&self, procs: &mut ProcessStore, pid: ProcessId) {
        let Some(slot) = procs.find(pid) else {
            panic!("task referenced missing process {pid}");
        };
        let remaining = match procs.ring.get(slot) {
            Some(process) => {
                let mut inner = process.inner.lock();
                inner.live_tasks = match inner.live_tasks.checked_sub(1) {
                    Some(count) => count,
                    None => panic!("process {pid} live task count underflow"),
                };
                inner.live_tasks
            }
            None => 0,
        };
        if remaining == 0 && pid != self.kernel_pid {
            self.teardown_process(procs, slot);
        }
    }

    /// Releases everything a dead process holds.
    ///
    /// Attached pipe ends are closed with the usual two-sided deletion; pipes the process
    /// created but never opened lose their owner.
    fn teardown_process(&self, procs: &mut ProcessStore, slot: SlotId) {
        let Some(process) = procs.ring.remove(slot) else {
            return;
        };
        let pid = process.id;
        let handle = process.address_space;
        let inner = process.inner.into_inner();
        for local in inner.pipes {
            if let Err(err) = self.platform.address_spaces.unmap(handle, local.base, local.len) {
                warn!(target: "proc", "unmap of pipe {} in dead process {pid} failed: {err:?}", local.pipe);
            }
            self.release_pipe_end(&mut procs.pipes, pid, local.pipe);
        }
        let owned: Vec<PipeId> =
            procs.pipes.values().filter(|pipe| pipe.owner == Some(pid)).map(|pipe| pipe.id).collect();
        for id in owned {
            self.release_pipe_end(&mut procs.pipes, pid, id);
        }
        if let Err(err) = self.platform.address_spaces.destroy(handle) {
            warn!(target: "proc", "destroying address space of process {pid} failed: {err:?}");
        }
        info!(target: "proc", "process {pid} '{}' torn down", process.name);
    }

    pub fn process_info(&self, id: ProcessId) -> Option<ProcessInfo> {
        let procs = self.procs.lock();
        let process = procs.get(id)?;
        let inner = process.inner.lock();
        Some(ProcessInfo {
            id: process.id,
            name: process.name.clone(),
            address_space: process.address_space,
            live_tasks: inner.live_tasks,
            ipc_cursor: inner.ipc_cursor,
            capabilities: inner.capabilities.iter().map(|cap| cap.name.clone()).collect(),
            pipes: inner.pipes.clone(),
        })
    }

    /// Looks up a live process by name.
    pub fn find_process(&self, name: &str) -> Option<ProcessId> {
        self.procs.lock().find_by_name(name).map(Process::id)
    }
}
