// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process manager: task lifecycle, SMP round-robin scheduling, capabilities and pipes
//! OWNERS: @kernel-team
//! PUBLIC API: init(platform, config), init_with_console(platform, config, console), kernel(),
//!             Kernel, SyscallTable
//! DEPENDS_ON: hal::Platform for every machine-specific operation
//! INVARIANTS: One global Kernel per boot; the timer tick only ever trylocks

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

pub mod cap;
pub mod config;
pub mod diag;
pub mod error;
pub mod hal;
pub mod ids;
pub mod kernel;
pub mod mm;
pub mod pipe;
pub mod process;
pub mod ring;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod types;

#[cfg(test)]
mod testutil;

use spin::Once;

pub use config::KernelConfig;
pub use error::{Error, Result};
pub use hal::Platform;
pub use kernel::{InitError, Kernel};
pub use sched::TickOutcome;
pub use syscall::SyscallTable;
pub use task::{Permission, TaskKind, TaskState};
pub use types::{CapabilityId, CpuId, PipeId, ProcessId, TaskId, VirtAddr};

use diag::log::Console;
use hal::TimerFeatures;

static KERNEL: Once<Kernel> = Once::new();

/// Builds the global process manager and arms the per-core scheduling tick.
///
/// Runs once on the boot core before secondaries are released.
pub fn init(platform: Platform, config: KernelConfig) -> core::result::Result<&'static Kernel, InitError> {
    if KERNEL.is_completed() {
        return Err(InitError::AlreadyInitialized);
    }
    let kernel = Kernel::new(platform, config)?;
    let mut fresh = false;
    let global = KERNEL.call_once(|| {
        fresh = true;
        kernel
    });
    if !fresh {
        return Err(InitError::AlreadyInitialized);
    }
    global.platform().timer.request(
        TimerFeatures::PERIODIC | TimerFeatures::PER_CPU,
        global.config().tick_period_ns,
        on_tick,
    )?;
    log::info!(target: "boot", "scheduler tick armed every {} ns", global.config().tick_period_ns);
    Ok(global)
}

/// Installs the kernel logger on `console` at `config.log_level`, then runs [`init`].
pub fn init_with_console(
    platform: Platform,
    config: KernelConfig,
    console: &'static dyn Console,
) -> core::result::Result<&'static Kernel, InitError> {
    diag::log::install(console, config.log_level)?;
    init(platform, config)
}

/// The global process manager, once [`init`] has succeeded.
pub fn kernel() -> Option<&'static Kernel> {
    KERNEL.get()
}

fn on_tick(cpu: CpuId) {
    // Sleep deadlines are handled by the timer subsystem through `wake_expired`.
    if let Some(kernel) = KERNEL.get() {
        let _ = kernel.tick(cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::log::LogError;
    use crate::hal::fake::FakeMachine;
    use std::string::String;

    struct Sink(spin::Mutex<String>);

    impl Console for Sink {
        fn write_str(&self, s: &str) {
            self.0.lock().push_str(s);
        }
    }

    static SINK: Sink = Sink(spin::Mutex::new(String::new()));

    // The only test touching the global instance and the global logger.
    #[test]
    fn init_arms_timer_once() {
        let machine = FakeMachine::new();
        let config = KernelConfig::new().with_log_level(log::LevelFilter::Debug);
        let global = init_with_console(machine.platform(), config, &SINK).unwrap();
        assert!(core::ptr::eq(global, kernel().unwrap()));
        assert_eq!(log::max_level(), log::LevelFilter::Debug.min(diag::log::build_max_level()));
        assert!(SINK.0.lock().contains("[INFO boot] process manager up"));
        assert_eq!(
            machine.installed_timer(),
            Some((TimerFeatures::PERIODIC | TimerFeatures::PER_CPU, 1_000_000))
        );
        assert!(machine.fire_tick(CpuId::BOOT));

        let other = FakeMachine::new();
        assert!(matches!(init(other.platform(), KernelConfig::new()), Err(InitError::AlreadyInitialized)));
        assert_eq!(other.installed_timer(), None);
        assert!(matches!(
            init_with_console(other.platform(), KernelConfig::new(), &SINK),
            Err(InitError::Logger(LogError::AlreadyInstalled))
        ));
    }
}
