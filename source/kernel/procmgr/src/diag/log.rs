// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: `log` facade backend writing single-line records to a kernel console
//! OWNERS: @kernel-team
//! STATUS: Functional
//! PUBLIC API: Console, KernelLogger, install(console, level), LogError
//! DEPENDS_ON: log, spin
//! INVARIANTS: Debug/Trace only in debug builds; one record is one uninterrupted line

use core::fmt::{self, Write};

use ::log::{Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Byte sink provided by the platform (UART, SBI console, host buffer).
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

/// Failure to register the global logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("a logger is already installed")]
    AlreadyInstalled,
}

/// Most verbose level this build emits.
pub const fn build_max_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    }
}

/// Logger formatting `[LEVEL target] message`.
pub struct KernelLogger<'a> {
    console: &'a dyn Console,
    level: LevelFilter,
    // Serialises records from different cores.
    line: Mutex<()>,
}

impl<'a> KernelLogger<'a> {
    pub fn new(console: &'a dyn Console, level: LevelFilter) -> Self {
        Self { console, level: level.min(build_max_level()), line: Mutex::new(()) }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

struct ConsoleWriter<'a>(&'a dyn Console);

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

const fn tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

impl Log for KernelLogger<'_> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _line = self.line.lock();
        let mut out = ConsoleWriter(self.console);
        let _ = writeln!(out, "[{} {}] {}", tag(record.level()), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: Once<KernelLogger<'static>> = Once::new();

/// Registers the kernel logger as the global `log` backend.
pub fn install(console: &'static dyn Console, level: LevelFilter) -> Result<(), LogError> {
    if LOGGER.is_completed() {
        return Err(LogError::AlreadyInstalled);
    }
    let logger = LOGGER.call_once(|| KernelLogger::new(console, level));
    ::log::set_logger(logger).map_err(|_| LogError::AlreadyInstalled)?;
    ::log::set_max_level(logger.level());
    Ok(())
}
