// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Error taxonomy for the process manager and its ABI status codes
//! OWNERS: @kernel-team
//! PUBLIC API: Error, Result, OK, UNKNOWN, OUT_OF_MEMORY
//! DEPENDS_ON: hal (collaborator error types)
//! INVARIANTS: Every error maps to exactly one ABI status; OUT_OF_MEMORY only for exhaustion

use crate::hal::{AddressSpaceError, FrameError, StoreError};

/// Call completed.
pub const OK: isize = 0;
/// Lookup, authorization and conflict failures share this status.
pub const UNKNOWN: isize = -1;
/// Memory or identifier space exhausted.
pub const OUT_OF_MEMORY: isize = -2;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Failures reported by process manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,
    #[error("unknown task")]
    UnknownTask,
    #[error("unknown process")]
    UnknownProcess,
    #[error("unknown capability")]
    UnknownCapability,
    #[error("unknown pipe")]
    UnknownPipe,
    #[error("already exists")]
    AlreadyExists,
    #[error("unauthorized")]
    Unauthorized,
    #[error("pipe busy")]
    Busy,
    #[error("pipe deleted")]
    Deleted,
    #[error("invalid task state transition")]
    InvalidState,
    #[error("invalid name")]
    InvalidName,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no current task on this cpu")]
    NoCurrentTask,
    #[error("cpu id out of range")]
    InvalidCpu,
    #[error("address space: {0:?}")]
    AddressSpace(AddressSpaceError),
    #[error("name store: {0:?}")]
    Store(StoreError),
    #[error("fault while copying from user memory")]
    UserFault,
}

impl Error {
    /// Collapses the error into the small ABI status set.
    pub const fn code(self) -> isize {
        match self {
            Error::OutOfMemory
            | Error::Store(StoreError::Full)
            | Error::AddressSpace(AddressSpaceError::Exhausted) => OUT_OF_MEMORY,
            _ => UNKNOWN,
        }
    }
}

impl From<AddressSpaceError> for Error {
    fn from(value: AddressSpaceError) -> Self {
        Self::AddressSpace(value)
    }
}

impl From<StoreError> for Error {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<FrameError> for Error {
    fn from(_: FrameError) -> Self {
        Self::OutOfMemory
    }
}
