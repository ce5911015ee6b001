// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot-time tunables of the process manager
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig, ConfigError
//! DEPENDS_ON: mm::PAGE_SIZE, log::LevelFilter
//! INVARIANTS: A Kernel is only ever built from a config that passed validate()

use log::LevelFilter;

use crate::mm::PAGE_SIZE;

/// Tunables fixed at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Period of the per-core scheduler tick.
    pub tick_period_ns: u64,
    pub kernel_stack_size: usize,
    /// First virtual address handed out for pipe mappings in every process.
    pub ipc_window_base: usize,
    pub ipc_window_len: usize,
    /// Longest accepted task, process, capability or pipe name in bytes.
    pub max_name_len: usize,
    pub max_pipe_size: usize,
    pub log_level: LevelFilter,
}

/// Reasons a configuration is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick period must be non-zero")]
    ZeroTickPeriod,
    #[error("kernel stack size must be a non-zero multiple of 16")]
    BadStackSize,
    #[error("ipc window must be page aligned")]
    UnalignedIpcWindow,
    #[error("ipc window overflows the address range")]
    IpcWindowOverflow,
    #[error("name length limit must be non-zero")]
    ZeroNameLength,
    #[error("pipe size limit must be non-zero")]
    ZeroPipeSize,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            tick_period_ns: 1_000_000,
            kernel_stack_size: 16 * 1024,
            ipc_window_base: 0x20_0000_0000,
            ipc_window_len: 64 << 30,
            max_name_len: 64,
            max_pipe_size: 16 << 20,
            log_level: LevelFilter::Info,
        }
    }

    pub const fn with_tick_period_ns(mut self, ns: u64) -> Self {
        self.tick_period_ns = ns;
        self
    }

    pub const fn with_kernel_stack_size(mut self, bytes: usize) -> Self {
        self.kernel_stack_size = bytes;
        self
    }

    pub const fn with_ipc_window(mut self, base: usize, len: usize) -> Self {
        self.ipc_window_base = base;
        self.ipc_window_len = len;
        self
    }

    pub const fn with_max_name_len(mut self, bytes: usize) -> Self {
        self.max_name_len = bytes;
        self
    }

    pub const fn with_max_pipe_size(mut self, bytes: usize) -> Self {
        self.max_pipe_size = bytes;
        self
    }

    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// One past the last address of the IPC window.
    ///
    /// Only meaningful after `validate` succeeded.
    pub const fn ipc_window_end(&self) -> usize {
        self.ipc_window_base.wrapping_add(self.ipc_window_len)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period_ns == 0 {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.kernel_stack_size == 0 || self.kernel_stack_size % 16 != 0 {
            return Err(ConfigError::BadStackSize);
        }
        if self.ipc_window_base % PAGE_SIZE != 0 || self.ipc_window_len % PAGE_SIZE != 0 {
            return Err(ConfigError::UnalignedIpcWindow);
        }
        if self.ipc_window_base.checked_add(self.ipc_window_len).is_none() {
            return Err(ConfigError::IpcWindowOverflow);
        }
        if self.max_name_len == 0 {
            return Err(ConfigError::ZeroNameLength);
        }
        if self.max_pipe_size == 0 {
            return Err(ConfigError::ZeroPipeSize);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
