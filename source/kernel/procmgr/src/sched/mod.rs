// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-core round-robin scheduler driven by the timer tick
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! PUBLIC API: CoreState, TickOutcome, Kernel::tick(cpu)
//! DEPENDS_ON: task::TaskStore, process::ProcessStore, hal::{AddressSpaceOps,RegisterOps,FpuOps}
//! INVARIANTS: Never blocks: every lock on the tick path is a trylock and contention skips the tick;
//!             at most one task resumed per tick, in ring order after the previous one;
//!             only the owning core writes its CoreState; exited tasks are reaped at the end of a tick
//!
//! The scan is O(n) in the number of tasks and keeps no priority or fairness data beyond
//! ring order. A task that stays blocked is skipped forever.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::kernel::Kernel;
use crate::process::ProcessStore;
use crate::ring::SlotId;
use crate::task::{Permission, TaskState, TaskStore};
use crate::types::{CpuId, ProcessId, TaskId};

macro_rules! sched_log {
    ($($arg:tt)+) => {
        if cfg!(feature = "debug_sched") {
            log::debug!(target: "sched", $($arg)+);
        } else {
            log::trace!(target: "sched", $($arg)+);
        }
    };
}

/// Scheduler state of one core. Raw value 0 means no active task.
pub struct CoreState {
    task: AtomicU64,
    process: AtomicU64,
    privileged: AtomicBool,
}

impl CoreState {
    pub const fn new() -> Self {
        Self { task: AtomicU64::new(0), process: AtomicU64::new(0), privileged: AtomicBool::new(true) }
    }

    pub fn active_task(&self) -> Option<TaskId> {
        match self.task.load(Ordering::Acquire) {
            0 => None,
            raw => Some(TaskId::from_raw(raw)),
        }
    }

    pub fn active_process(&self) -> Option<ProcessId> {
        match self.process.load(Ordering::Acquire) {
            0 => None,
            raw => Some(ProcessId::from_raw(raw)),
        }
    }

    /// Privilege of the active task; the boot context counts as kernel.
    pub fn permission(&self) -> Permission {
        if self.privileged.load(Ordering::Acquire) {
            Permission::Kernel
        } else {
            Permission::Unprivileged
        }
    }

    fn activate(&self, task: TaskId, process: ProcessId, perms: Permission) {
        self.privileged.store(perms == Permission::Kernel, Ordering::Release);
        self.process.store(process.as_raw(), Ordering::Release);
        self.task.store(task.as_raw(), Ordering::Release);
    }

    fn clear(&self) {
        self.task.store(0, Ordering::Release);
        self.process.store(0, Ordering::Release);
        self.privileged.store(true, Ordering::Release);
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A lock on the tick path was busy; nothing changed.
    Contended,
    /// No runnable task; the core has no active task now.
    Idle,
    Switched { from: Option<TaskId>, to: TaskId },
    InvalidCpu,
}

impl Kernel {
    /// Runs one scheduling decision for `cpu`, then reaps tasks that finished exiting.
    pub fn tick(&self, cpu: CpuId) -> TickOutcome {
        let Ok(core) = self.core(cpu) else {
            return TickOutcome::InvalidCpu;
        };
        let Some(mut tasks) = self.tasks.try_lock() else {
            sched_log!("cpu {cpu}: task store busy, skipping tick");
            return TickOutcome::Contended;
        };
        let Some(mut procs) = self.procs.try_lock() else {
            sched_log!("cpu {cpu}: process store busy, skipping tick");
            return TickOutcome::Contended;
        };

        let previous = core.active_task();
        let mut start = tasks.ring.head();
        if let Some(prev_id) = previous {
            if let Some(slot) = tasks.find(prev_id) {
                let Some(task) = tasks.ring.get(slot) else {
                    return TickOutcome::Contended;
                };
                let Some(mut guard) = task.inner.try_lock() else {
                    sched_log!("cpu {cpu}: task {prev_id} busy, skipping tick");
                    return TickOutcome::Contended;
                };
                let inner = &mut *guard;
                match inner.state {
                    TaskState::Running => {
                        self.platform.registers.save(&mut inner.regs);
                        self.platform.fpu.save(&mut inner.fpu);
                        inner.state = TaskState::Suspended;
                    }
                    TaskState::Blocked => {
                        self.platform.registers.save(&mut inner.regs);
                        self.platform.fpu.save(&mut inner.fpu);
                    }
                    TaskState::Exiting | TaskState::Exited => {
                        inner.state = TaskState::Exited;
                        sched_log!("cpu {cpu}: task {prev_id} finished exiting");
                    }
                    state => {
                        log::warn!(target: "sched", "cpu {cpu}: active task {prev_id} in state {state:?}");
                    }
                }
                inner.on_cpu = None;
                start = tasks.ring.next(slot);
            }
            core.clear();
        }

        let outcome = match start {
            Some(start) => self.resume_next(cpu, core, &tasks, &procs, start, previous),
            None => TickOutcome::Idle,
        };
        let reaped = self.reap_locked(&mut tasks, &mut procs);
        if reaped > 0 {
            sched_log!("cpu {cpu}: reaped {reaped} tasks");
        }
        outcome
    }

    /// Resumes the first runnable task in ring order from `start`.
    fn resume_next(
        &self,
        cpu: CpuId,
        core: &CoreState,
        tasks: &TaskStore,
        procs: &ProcessStore,
        start: SlotId,
        previous: Option<TaskId>,
    ) -> TickOutcome {
        for (_, task) in tasks.ring.cycle_from(start) {
            let Some(mut guard) = task.inner.try_lock() else {
                continue;
            };
            if !guard.state.is_runnable() {
                continue;
            }
            let Some(process) = procs.get(task.pid()) else {
                panic!("task {} belongs to missing process {}", task.id(), task.pid());
            };
            if let Err(err) = self.platform.address_spaces.activate(process.address_space()) {
                panic!("cannot activate address space of process {}: {err:?}", process.id());
            }
            let inner = &mut *guard;
            self.platform.registers.restore(&inner.regs);
            self.platform.fpu.restore(&inner.fpu);
            inner.state = TaskState::Running;
            inner.on_cpu = Some(cpu);
            core.activate(task.id(), task.pid(), task.perms());
            sched_log!("cpu {cpu}: {previous:?} -> task {}", task.id());
            return TickOutcome::Switched { from: previous, to: task.id() };
        }
        TickOutcome::Idle
    }
}
