// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Task store and task lifecycle operations
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! PUBLIC API: Task, TaskState, TaskKind, Permission, TaskInfo, TaskStore,
//!             Kernel::{create_task,start_task,exit,kill_task,nanosleep,wake,wake_expired,reap,task_info}
//! DEPENDS_ON: ring::Ring, process::ProcessStore, hal::{RegisterOps,FpuOps,Timer}, mm::StateBuffer
//! INVARIANTS: Task Store lock before Process Store lock before node locks;
//!             state changes only along TaskState::can_become; kernel stack and FPU buffer never aliased

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use log::{debug, info};
use spin::Mutex;

use crate::error::{Error, Result};
use crate::hal::RegisterFrame;
use crate::kernel::Kernel;
use crate::mm::StateBuffer;
use crate::process::ProcessStore;
use crate::ring::{Ring, SlotId};
use crate::types::{CpuId, ProcessId, TaskId, VirtAddr};

/// Exit code recorded for tasks terminated by `kill_task`.
pub const KILLED_EXIT_CODE: i32 = -1;

const KERNEL_STACK_ALIGN: usize = 16;

/// What `create_task` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Joins the creator's process.
    Thread,
    /// Gets a fresh process with its own address space.
    Process,
}

/// Privilege class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Unprivileged,
    Kernel,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Pending,
    Running,
    Suspended,
    Blocked,
    /// Terminated but possibly still executing on a core; the next tick there finishes it.
    Exiting,
    Exited,
}

impl TaskState {
    /// Returns true if the state machine allows moving from `self` to `next`.
    pub const fn can_become(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Uninitialized, Pending)
            | (Pending, Running)
            | (Running, Suspended | Blocked | Exiting)
            | (Suspended, Running)
            | (Blocked, Running | Pending)
            | (Exiting, Exited) => true,
            (Exiting | Exited, _) => false,
            (_, Exiting) => true,
            _ => false,
        }
    }

    /// States a tick may resume.
    pub const fn is_runnable(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Suspended)
    }
}

/// Mutable part of a task, guarded by the per-task lock.
pub(crate) struct TaskInner {
    pub state: TaskState,
    pub regs: RegisterFrame,
    pub fpu: StateBuffer,
    /// Wake deadline of a sleeping task.
    pub wake_at: Option<u64>,
    /// Core whose active task this is.
    pub on_cpu: Option<CpuId>,
    pub exit_code: Option<i32>,
}

impl TaskInner {
    pub fn transition(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_become(next) {
            return Err(Error::InvalidState);
        }
        self.state = next;
        Ok(())
    }
}

/// Execution context.
pub struct Task {
    id: TaskId,
    pid: ProcessId,
    name: String,
    kind: TaskKind,
    perms: Permission,
    kernel_stack: StateBuffer,
    pub(crate) inner: Mutex<TaskInner>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn perms(&self) -> Permission {
        self.perms
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub pid: ProcessId,
    pub name: String,
    pub kind: TaskKind,
    pub perms: Permission,
    pub state: TaskState,
    pub on_cpu: Option<CpuId>,
    pub exit_code: Option<i32>,
}

/// All tasks of the system in one ring; links are covered by the store lock.
pub struct TaskStore {
    pub(crate) ring: Ring<Task>,
}

impl TaskStore {
    pub const fn new() -> Self {
        Self { ring: Ring::new() }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn find(&self, id: TaskId) -> Option<SlotId> {
        self.ring.find(|task| task.id == id)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.find(id).and_then(|slot| self.ring.get(slot))
    }

    /// Task ids in ring order.
    pub fn ids(&self) -> Vec<TaskId> {
        self.ring.iter().map(|(_, task)| task.id).collect()
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Creates a task in state `Uninitialized`.
    ///
    /// A `Thread` joins the caller's process; a `Process` task gets a new process named
    /// after the task.
    pub fn create_task(
        &self,
        cpu: CpuId,
        kind: TaskKind,
        name: &str,
        perms: Permission,
    ) -> Result<TaskId> {
        self.validate_name(name)?;
        let caller = self.caller(cpu)?;
        if caller.perms == Permission::Unprivileged && perms == Permission::Kernel {
            debug!(target: "task", "unprivileged process {} asked for a kernel task", caller.pid);
            return Err(Error::Unauthorized);
        }
        let id = self.ids.task()?;
        let kernel_stack = StateBuffer::zeroed(self.config.kernel_stack_size, KERNEL_STACK_ALIGN)?;
        let fpu = StateBuffer::zeroed(self.platform.fpu.state_size(), self.platform.fpu.state_align())?;

        let mut tasks = self.tasks.lock();
        let mut procs = self.procs.lock();
        let pid = match kind {
            TaskKind::Thread => {
                let process = procs.get(caller.pid).ok_or(Error::UnknownProcess)?;
                process.inner.lock().live_tasks += 1;
                caller.pid
            }
            TaskKind::Process => self.spawn_process(&mut procs, name)?,
        };
        drop(procs);

        tasks.ring.insert(Task {
            id,
            pid,
            name: String::from(name),
            kind,
            perms,
            kernel_stack,
            inner: Mutex::new(TaskInner {
                state: TaskState::Uninitialized,
                regs: RegisterFrame::default(),
                fpu,
                wake_at: None,
                on_cpu: None,
                exit_code: None,
            }),
        });
        info!(target: "task", "created {kind:?} task {id} '{name}' in process {pid}");
        Ok(id)
    }

    /// Installs the initial context at `entry` and makes the task schedulable.
    pub fn start_task(&self, cpu: CpuId, id: TaskId, entry: VirtAddr) -> Result<()> {
        let caller = self.caller(cpu)?;
        let tasks = self.tasks.lock();
        let task = tasks.get(id).ok_or(Error::UnknownTask)?;
        if caller.perms == Permission::Unprivileged && task.pid != caller.pid {
            return Err(Error::Unauthorized);
        }
        let mut inner = task.inner.lock();
        if inner.state != TaskState::Uninitialized {
            return Err(Error::InvalidState);
        }
        inner.regs = self.platform.registers.default_state(task.kernel_stack.top(), entry, task.perms);
        inner.transition(TaskState::Pending)?;
        debug!(target: "task", "started task {id} at {entry}");
        Ok(())
    }

    /// Terminates the calling task; its core finishes the exit on the next tick.
    pub fn exit(&self, cpu: CpuId, code: i32) -> Result<()> {
        let id = self.core(cpu)?.active_task().ok_or(Error::NoCurrentTask)?;
        let tasks = self.tasks.lock();
        let task = tasks.get(id).ok_or(Error::UnknownTask)?;
        let mut inner = task.inner.lock();
        inner.transition(TaskState::Exiting)?;
        inner.exit_code = Some(code);
        info!(target: "task", "task {id} exiting with code {code}");
        Ok(())
    }

    /// Terminates another task.
    ///
    /// Unprivileged callers may only kill tasks of their own process.
    pub fn kill_task(&self, cpu: CpuId, id: TaskId) -> Result<()> {
        let caller = self.caller(cpu)?;
        let tasks = self.tasks.lock();
        let task = tasks.get(id).ok_or(Error::UnknownTask)?;
        if caller.perms == Permission::Unprivileged && task.pid != caller.pid {
            return Err(Error::Unauthorized);
        }
        let mut inner = task.inner.lock();
        let was = inner.state;
        inner.transition(TaskState::Exiting)?;
        if was != TaskState::Running {
            inner.transition(TaskState::Exited)?;
        }
        inner.exit_code = Some(KILLED_EXIT_CODE);
        info!(target: "task", "task {id} killed by process {} (was {was:?})", caller.pid);
        Ok(())
    }

    /// Blocks the calling task for `ns` nanoseconds.
    ///
    /// Returns true when the task blocked and the caller should reschedule.
    pub fn nanosleep(&self, cpu: CpuId, ns: u64) -> Result<bool> {
        if ns == 0 {
            return Ok(false);
        }
        let id = self.core(cpu)?.active_task().ok_or(Error::NoCurrentTask)?;
        let deadline = self.platform.timer.now_ns().saturating_add(ns);
        let tasks = self.tasks.lock();
        let task = tasks.get(id).ok_or(Error::UnknownTask)?;
        let mut inner = task.inner.lock();
        inner.transition(TaskState::Blocked)?;
        inner.wake_at = Some(deadline);
        debug!(target: "task", "task {id} sleeping until {deadline}ns");
        Ok(true)
    }

    /// Unblocks a blocked task.
    pub fn wake(&self, id: TaskId) -> Result<()> {
        let tasks = self.tasks.lock();
        let task = tasks.get(id).ok_or(Error::UnknownTask)?;
        let mut inner = task.inner.lock();
        wake_locked(&mut inner)
    }

    /// Wakes every sleeper whose deadline is at or before `now`; returns how many woke.
    pub fn wake_expired(&self, now: u64) -> usize {
        let tasks = self.tasks.lock();
        let mut woken = 0;
        for (_, task) in tasks.ring.iter() {
            let mut inner = task.inner.lock();
            let due = inner.wake_at.is_some_and(|deadline| deadline <= now);
            if inner.state == TaskState::Blocked && due && wake_locked(&mut inner).is_ok() {
                woken += 1;
            }
        }
        woken
    }

    /// Removes exited tasks and tears down user processes left without tasks.
    ///
    /// Every tick already does this; the explicit call is for shutdown paths and tests.
    pub fn reap(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let mut procs = self.procs.lock();
        self.reap_locked(&mut tasks, &mut procs)
    }

    /// Reaping with both store locks held. Busy task nodes are left for a later pass.
    pub(crate) fn reap_locked(&self, tasks: &mut TaskStore, procs: &mut ProcessStore) -> usize {
        let doomed: Vec<SlotId> = tasks
            .ring
            .iter()
            .filter(|(_, task)| {
                task.inner
                    .try_lock()
                    .is_some_and(|inner| inner.state == TaskState::Exited && inner.on_cpu.is_none())
            })
            .map(|(slot, _)| slot)
            .collect();
        let mut reaped = 0;
        for slot in doomed {
            if let Some(task) = tasks.ring.remove(slot) {
                debug!(target: "task", "reaped task {} '{}'", task.id, task.name);
                self.release_task(procs, task.pid);
                reaped += 1;
            }
        }
        reaped
    }

    pub fn task_info(&self, id: TaskId) -> Option<TaskInfo> {
        let tasks = self.tasks.lock();
        let task = tasks.get(id)?;
        let inner = task.inner.lock();
        Some(TaskInfo {
            id: task.id,
            pid: task.pid,
            name: task.name.clone(),
            kind: task.kind,
            perms: task.perms,
            state: inner.state,
            on_cpu: inner.on_cpu,
            exit_code: inner.exit_code,
        })
    }

    /// Task ids in ring order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.lock().ids()
    }
}

fn wake_locked(inner: &mut TaskInner) -> Result<()> {
    if inner.state != TaskState::Blocked {
        return Err(Error::InvalidState);
    }
    // Still the active task of its core: resume in place.
    let next = if inner.on_cpu.is_some() { TaskState::Running } else { TaskState::Pending };
    inner.transition(next)?;
    inner.wake_at = None;
    Ok(())
}
