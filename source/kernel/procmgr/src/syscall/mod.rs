// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher for the process manager surface
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Context, Completion, Reply, Handler, UserMemory, SYSCALL_* IDs
//! DEPENDS_ON: kernel::Kernel, syscall::api
//! INVARIANTS: Fixed MAX_SYSCALL window; stable IDs; decode/check/execute discipline;
//!             every outcome collapses to the OK / UNKNOWN / OUT_OF_MEMORY status set

pub mod api;

use log::debug;

use crate::error::{self, Error, Result};
use crate::kernel::Kernel;
use crate::types::CpuId;

/// Size of the dispatch window.
pub const MAX_SYSCALL: usize = 16;

pub const SYSCALL_CREATE_TASK: usize = 0;
pub const SYSCALL_START_TASK: usize = 1;
pub const SYSCALL_EXIT: usize = 2;
pub const SYSCALL_KILL_TASK: usize = 3;
pub const SYSCALL_CREATE_PIPE: usize = 4;
pub const SYSCALL_OPEN_PIPE: usize = 5;
pub const SYSCALL_CLOSE_PIPE: usize = 6;
pub const SYSCALL_CREATE_CAPABILITY: usize = 7;
pub const SYSCALL_SHARE_CAPABILITY: usize = 8;
pub const SYSCALL_NANOSLEEP: usize = 9;
/// Withdraws a grant made by `SYSCALL_SHARE_CAPABILITY`.
pub const SYSCALL_REVOKE_CAPABILITY: usize = 10;

/// Syscall arguments passed in registers a0-a5.
#[derive(Default, Clone, Copy, Debug)]
pub struct Args {
    regs: [usize; 6],
}

impl Args {
    pub const fn new(regs: [usize; 6]) -> Self {
        Self { regs }
    }

    /// Returns the raw register at `index`.
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// User pointer could not be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserFault;

impl From<UserFault> for Error {
    fn from(_: UserFault) -> Self {
        Error::UserFault
    }
}

/// Access to the calling task's memory, provided by the trap layer.
pub trait UserMemory {
    /// Copies `dst.len()` bytes starting at user address `src`.
    fn copy_in(&self, src: usize, dst: &mut [u8]) -> core::result::Result<(), UserFault>;
}

/// Everything a handler may touch.
pub struct Context<'a> {
    pub kernel: &'a Kernel,
    pub cpu: CpuId,
    pub user: &'a dyn UserMemory,
}

/// Successful handler result before status encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reply {
    pub values: [usize; 2],
    /// The caller stopped running (exit, blocking sleep); the trap exit path must reschedule.
    pub reschedule: bool,
}

impl Reply {
    pub const fn empty() -> Self {
        Self { values: [0; 2], reschedule: false }
    }

    pub const fn value(value: usize) -> Self {
        Self { values: [value, 0], reschedule: false }
    }

    pub const fn pair(first: usize, second: usize) -> Self {
        Self { values: [first, second], reschedule: false }
    }

    pub const fn rescheduling() -> Self {
        Self { values: [0; 2], reschedule: true }
    }
}

/// What the trap layer writes back to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    pub status: isize,
    pub values: [usize; 2],
    pub reschedule: bool,
}

impl From<Result<Reply>> for Completion {
    fn from(result: Result<Reply>) -> Self {
        match result {
            Ok(reply) => Self { status: error::OK, values: reply.values, reschedule: reply.reschedule },
            Err(err) => Self { status: err.code(), values: [0; 2], reschedule: false },
        }
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&Context<'_>, &Args) -> Result<Reply>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Table with every process manager handler installed.
    pub fn with_default_handlers() -> Self {
        let mut table = Self::new();
        api::install_handlers(&mut table);
        table
    }

    /// Registers a handler; numbers outside the window are ignored.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if let Some(slot) = self.handlers.get_mut(number) {
            *slot = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(&self, number: usize, ctx: &Context<'_>, args: &Args) -> Completion {
        let Some(handler) = self.handlers.get(number).copied().flatten() else {
            debug!(target: "syscall", "cpu {}: unknown syscall {number}", ctx.cpu);
            return Completion::from(Err(Error::InvalidArgument));
        };
        let result = handler(ctx, args);
        if let Err(err) = result {
            debug!(target: "syscall", "cpu {}: syscall {number} failed: {err}", ctx.cpu);
        }
        Completion::from(result)
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}
