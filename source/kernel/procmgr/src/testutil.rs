// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::config::KernelConfig;
use crate::hal::fake::FakeMachine;
use crate::kernel::Kernel;
use crate::sched::TickOutcome;
use crate::task::{Permission, TaskKind};
use crate::types::{CpuId, ProcessId, TaskId, VirtAddr, MAX_CPUS};

/// Core that no test schedules on; calls issued from it act as the kernel.
pub const SPARE_CPU: CpuId = CpuId::from_raw((MAX_CPUS - 1) as u16);

pub fn boot() -> (Kernel, Arc<FakeMachine>) {
    boot_with(KernelConfig::new())
}

pub fn boot_with(config: KernelConfig) -> (Kernel, Arc<FakeMachine>) {
    let machine = FakeMachine::new();
    let kernel = Kernel::new(machine.platform(), config).expect("boot");
    (kernel, machine)
}

/// Spawns an unprivileged process with one started task at `entry`.
pub fn start_user_process(kernel: &Kernel, name: &str, entry: usize) -> (TaskId, ProcessId) {
    let task = kernel
        .create_task(SPARE_CPU, TaskKind::Process, name, Permission::Unprivileged)
        .expect("create process task");
    kernel.start_task(SPARE_CPU, task, VirtAddr::new(entry)).expect("start");
    let pid = kernel.task_info(task).expect("task info").pid;
    (task, pid)
}

/// Ticks `cpu` until `task` is the active task there.
pub fn run_on(kernel: &Kernel, cpu: CpuId, task: TaskId) {
    let bound = kernel.task_ids().len() + 1;
    for _ in 0..bound {
        if kernel.current_task(cpu) == Ok(Some(task)) {
            return;
        }
        if kernel.tick(cpu) == TickOutcome::Contended {
            panic!("store contended during single-threaded test");
        }
    }
    assert_eq!(kernel.current_task(cpu), Ok(Some(task)), "task {task} never ran on cpu {cpu}");
}
