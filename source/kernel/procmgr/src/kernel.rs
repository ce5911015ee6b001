// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: The process manager aggregate shared by every core
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, InitError, KERNEL_PROCESS_NAME
//! DEPENDS_ON: config, ids, task::TaskStore, process::ProcessStore, sched::CoreState, hal::Platform
//! INVARIANTS: Lock order is tasks -> procs -> node; the kernel process exists for the whole lifetime

use spin::Mutex;
use static_assertions::{assert_impl_all, const_assert};

use crate::config::{ConfigError, KernelConfig};
use crate::diag::log::LogError;
use crate::error::{Error, Result};
use crate::hal::{AsHandle, Platform, TimerError};
use crate::ids::IdAllocator;
use crate::process::{Process, ProcessStore, PROCS_DIR};
use crate::sched::CoreState;
use crate::task::{Permission, TaskStore};
use crate::types::{CpuId, ProcessId, TaskId, MAX_CPUS};

/// Name of the process that owns boot-time work and kernel threads.
pub const KERNEL_PROCESS_NAME: &str = "kernel";

/// Failures while bringing the process manager up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("kernel process setup failed: {0}")]
    Kernel(#[from] Error),
    #[error("timer request failed: {0:?}")]
    Timer(TimerError),
    #[error("logger setup failed: {0}")]
    Logger(#[from] LogError),
    #[error("process manager already initialised")]
    AlreadyInitialized,
}

impl From<TimerError> for InitError {
    fn from(value: TimerError) -> Self {
        Self::Timer(value)
    }
}

/// Identity of whoever issued a call on a given core.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Caller {
    pub pid: ProcessId,
    pub perms: Permission,
}

/// Task store, process store and per-core state over one platform.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) ids: IdAllocator,
    pub(crate) tasks: Mutex<TaskStore>,
    pub(crate) procs: Mutex<ProcessStore>,
    pub(crate) cores: [CoreState; MAX_CPUS],
    pub(crate) kernel_pid: ProcessId,
    pub(crate) platform: Platform,
}

assert_impl_all!(Kernel: Send, Sync);
const_assert!(MAX_CPUS > 0 && MAX_CPUS <= u16::MAX as usize);

impl Kernel {
    /// Validates `config` and creates the kernel process.
    pub fn new(platform: Platform, config: KernelConfig) -> core::result::Result<Self, InitError> {
        config.validate()?;
        let ids = IdAllocator::new();
        let address_space = platform.address_spaces.create().map_err(Error::from)?;
        let kernel_pid = match ids.process() {
            Ok(pid) => pid,
            Err(err) => {
                release_space(&platform, address_space);
                return Err(err.into());
            }
        };
        let mut procs = ProcessStore::new();
        procs.ring.insert(Process::new(kernel_pid, KERNEL_PROCESS_NAME, address_space, config.ipc_window_base));
        let kernel = Self {
            config,
            ids,
            tasks: Mutex::new(TaskStore::new()),
            procs: Mutex::new(procs),
            cores: core::array::from_fn(|_| CoreState::new()),
            kernel_pid,
            platform,
        };
        let dirs = kernel
            .ensure_dir("", PROCS_DIR)
            .and_then(|()| kernel.ensure_dir(PROCS_DIR, KERNEL_PROCESS_NAME));
        if let Err(err) = dirs {
            release_space(&kernel.platform, address_space);
            return Err(err.into());
        }
        log::info!(target: "boot", "process manager up: kernel process {kernel_pid}, {MAX_CPUS} cpus");
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn kernel_pid(&self) -> ProcessId {
        self.kernel_pid
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn core(&self, cpu: CpuId) -> Result<&CoreState> {
        self.cores.get(cpu.as_index()).ok_or(Error::InvalidCpu)
    }

    /// Task currently running on `cpu`, if any.
    pub fn current_task(&self, cpu: CpuId) -> Result<Option<TaskId>> {
        Ok(self.core(cpu)?.active_task())
    }

    /// Process on whose behalf `cpu` is executing; the kernel process when idle.
    pub fn current_process(&self, cpu: CpuId) -> Result<ProcessId> {
        self.caller(cpu).map(|caller| caller.pid)
    }

    pub(crate) fn caller(&self, cpu: CpuId) -> Result<Caller> {
        let core = self.core(cpu)?;
        Ok(match core.active_process() {
            Some(pid) => Caller { pid, perms: core.permission() },
            None => Caller { pid: self.kernel_pid, perms: Permission::Kernel },
        })
    }

    /// Object names are non-empty, `/`-free and bounded.
    pub(crate) fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.len() > self.config.max_name_len || name.contains('/') {
            return Err(Error::InvalidName);
        }
        Ok(())
    }
}

fn release_space(platform: &Platform, handle: AsHandle) {
    if let Err(err) = platform.address_spaces.destroy(handle) {
        log::warn!(target: "boot", "leaking kernel address space {handle:?}: {err:?}");
    }
}
