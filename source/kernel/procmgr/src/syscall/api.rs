// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table)
//! DEPENDS_ON: task, pipe, cap via kernel::Kernel; syscall::UserMemory for string arguments
//! INVARIANTS: Stable syscall IDs; Decode→Check→Execute pattern; strings are (ptr, len) pairs

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use super::{
    Args, Context, Reply, SyscallTable, SYSCALL_CLOSE_PIPE, SYSCALL_CREATE_CAPABILITY,
    SYSCALL_CREATE_PIPE, SYSCALL_CREATE_TASK, SYSCALL_EXIT, SYSCALL_KILL_TASK, SYSCALL_NANOSLEEP,
    SYSCALL_OPEN_PIPE, SYSCALL_REVOKE_CAPABILITY, SYSCALL_SHARE_CAPABILITY, SYSCALL_START_TASK,
};
use crate::error::{Error, Result};
use crate::pipe::PipeFlags;
use crate::process::PROCS_DIR;
use crate::task::{Permission, TaskKind};
use crate::types::{PipeId, ProcessId, TaskId, VirtAddr};

/// Registers every process manager handler.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(SYSCALL_CREATE_TASK, sys_create_task);
    table.register(SYSCALL_START_TASK, sys_start_task);
    table.register(SYSCALL_EXIT, sys_exit);
    table.register(SYSCALL_KILL_TASK, sys_kill_task);
    table.register(SYSCALL_CREATE_PIPE, sys_create_pipe);
    table.register(SYSCALL_OPEN_PIPE, sys_open_pipe);
    table.register(SYSCALL_CLOSE_PIPE, sys_close_pipe);
    table.register(SYSCALL_CREATE_CAPABILITY, sys_create_capability);
    table.register(SYSCALL_SHARE_CAPABILITY, sys_share_capability);
    table.register(SYSCALL_NANOSLEEP, sys_nanosleep);
    table.register(SYSCALL_REVOKE_CAPABILITY, sys_revoke_capability);
}

/// Copies a UTF-8 string of at most `max` bytes out of user memory.
fn read_user_str(ctx: &Context<'_>, ptr: usize, len: usize, max: usize) -> Result<String> {
    if len > max {
        return Err(Error::InvalidName);
    }
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    bytes.resize(len, 0);
    if len > 0 {
        ctx.user.copy_in(ptr, &mut bytes)?;
    }
    String::from_utf8(bytes).map_err(|_| Error::InvalidName)
}

fn read_name(ctx: &Context<'_>, ptr: usize, len: usize) -> Result<String> {
    read_user_str(ctx, ptr, len, ctx.kernel.config().max_name_len)
}

// Typed decoders

#[derive(Clone)]
struct CreateTaskArgs {
    kind: TaskKind,
    name: String,
    perms: Permission,
}

impl CreateTaskArgs {
    fn decode(ctx: &Context<'_>, args: &Args) -> Result<Self> {
        let kind = match args.get(0) {
            0 => TaskKind::Thread,
            1 => TaskKind::Process,
            _ => return Err(Error::InvalidArgument),
        };
        let perms = match args.get(3) {
            0 => Permission::Unprivileged,
            1 => Permission::Kernel,
            _ => return Err(Error::InvalidArgument),
        };
        let name = read_name(ctx, args.get(1), args.get(2))?;
        Ok(Self { kind, name, perms })
    }
}

#[derive(Clone, Copy)]
struct StartTaskArgs {
    id: TaskId,
    entry: VirtAddr,
}

impl StartTaskArgs {
    fn decode(args: &Args) -> Self {
        Self { id: TaskId::from_raw(args.get(0) as u64), entry: VirtAddr::new(args.get(1)) }
    }

    fn check(&self) -> Result<()> {
        if self.entry.raw() == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(())
    }
}

struct CreatePipeArgs {
    name: String,
    capability: Option<String>,
    size: usize,
    flags: PipeFlags,
}

impl CreatePipeArgs {
    fn decode(ctx: &Context<'_>, args: &Args) -> Result<Self> {
        let flags = PipeFlags::from_bits(args.get(5) as u32).ok_or(Error::InvalidArgument)?;
        let name = read_name(ctx, args.get(0), args.get(1))?;
        // A zero-length capability name means "no capability".
        let capability = match args.get(3) {
            0 => None,
            len => Some(read_name(ctx, args.get(2), len)?),
        };
        Ok(Self { name, capability, size: args.get(4), flags })
    }
}

struct NamedGrantArgs {
    dst: ProcessId,
    name: String,
}

impl NamedGrantArgs {
    fn decode(ctx: &Context<'_>, args: &Args) -> Result<Self> {
        let dst = ProcessId::from_raw(args.get(0) as u64);
        let name = read_name(ctx, args.get(1), args.get(2))?;
        Ok(Self { dst, name })
    }
}

// Handlers

fn sys_create_task(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let typed = CreateTaskArgs::decode(ctx, args)?;
    let id = ctx.kernel.create_task(ctx.cpu, typed.kind, &typed.name, typed.perms)?;
    Ok(Reply::value(id.as_raw() as usize))
}

fn sys_start_task(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let typed = StartTaskArgs::decode(args);
    typed.check()?;
    ctx.kernel.start_task(ctx.cpu, typed.id, typed.entry)?;
    Ok(Reply::empty())
}

fn sys_exit(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    ctx.kernel.exit(ctx.cpu, args.get(0) as i32)?;
    Ok(Reply::rescheduling())
}

fn sys_kill_task(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let target = TaskId::from_raw(args.get(0) as u64);
    ctx.kernel.kill_task(ctx.cpu, target)?;
    // Killing yourself stops you like exit does.
    let own = ctx.kernel.current_task(ctx.cpu)? == Some(target);
    Ok(if own { Reply::rescheduling() } else { Reply::empty() })
}

fn sys_create_pipe(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let typed = CreatePipeArgs::decode(ctx, args)?;
    let id = ctx.kernel.create_pipe(
        ctx.cpu,
        &typed.name,
        typed.capability.as_deref(),
        typed.size,
        typed.flags,
    )?;
    Ok(Reply::value(id.as_raw() as usize))
}

fn sys_open_pipe(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let max = PROCS_DIR.len() + 2 + 2 * ctx.kernel.config().max_name_len;
    let path = read_user_str(ctx, args.get(0), args.get(1), max).map_err(|err| match err {
        Error::InvalidName => Error::UnknownPipe,
        other => other,
    })?;
    let (base, id) = ctx.kernel.open_pipe(ctx.cpu, &path)?;
    Ok(Reply::pair(base.raw(), id.as_raw() as usize))
}

fn sys_close_pipe(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    ctx.kernel.close_pipe(ctx.cpu, PipeId::from_raw(args.get(0) as u64))?;
    Ok(Reply::empty())
}

fn sys_create_capability(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let name = read_name(ctx, args.get(0), args.get(1))?;
    let id = ctx.kernel.create_capability(ctx.cpu, &name)?;
    Ok(Reply::value(id.as_raw() as usize))
}

fn sys_share_capability(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let typed = NamedGrantArgs::decode(ctx, args)?;
    ctx.kernel.share_capability(ctx.cpu, typed.dst, &typed.name)?;
    Ok(Reply::empty())
}

fn sys_revoke_capability(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let typed = NamedGrantArgs::decode(ctx, args)?;
    ctx.kernel.revoke_capability(ctx.cpu, typed.dst, &typed.name)?;
    Ok(Reply::empty())
}

fn sys_nanosleep(ctx: &Context<'_>, args: &Args) -> Result<Reply> {
    let blocked = ctx.kernel.nanosleep(ctx.cpu, args.get(0) as u64)?;
    Ok(if blocked { Reply::rescheduling() } else { Reply::empty() })
}
