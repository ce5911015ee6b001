// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Named capabilities owned by processes and shared with grantees
//! OWNERS: @kernel-cap-team
//! PUBLIC API: Capability, Kernel::{create_capability,share_capability,revoke_capability}
//! DEPENDS_ON: process::ProcessStore, ids::IdAllocator
//! INVARIANTS: Names unique per owner; a grantee appears at most once; only the owner shares or revokes;
//!             every operation runs under the Process Store lock for its full duration

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use log::debug;

use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::process::Process;
use crate::types::{CapabilityId, CpuId, ProcessId};

/// Permission token; grants reach only the pipes of its owner that name it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub id: CapabilityId,
    pub name: String,
    pub grantees: Vec<ProcessId>,
}

impl Capability {
    pub(crate) fn new(id: CapabilityId, name: &str) -> Self {
        Self { id, name: String::from(name), grantees: Vec::new() }
    }

    pub fn is_granted(&self, pid: ProcessId) -> bool {
        self.grantees.contains(&pid)
    }

    /// Adds `pid`; returns false if it was already a grantee.
    pub(crate) fn grant(&mut self, pid: ProcessId) -> bool {
        if self.is_granted(pid) {
            return false;
        }
        self.grantees.push(pid);
        true
    }

    /// Removes `pid`; returns false if it was not a grantee.
    pub(crate) fn revoke(&mut self, pid: ProcessId) -> bool {
        let before = self.grantees.len();
        self.grantees.retain(|grantee| *grantee != pid);
        self.grantees.len() != before
    }
}

pub(crate) fn find<'a>(caps: &'a [Capability], name: &str) -> Option<&'a Capability> {
    caps.iter().find(|cap| cap.name == name)
}

fn find_mut<'a>(caps: &'a mut [Capability], name: &str) -> Option<&'a mut Capability> {
    caps.iter_mut().find(|cap| cap.name == name)
}

impl Kernel {
    /// Creates a capability owned by the calling process.
    pub fn create_capability(&self, cpu: CpuId, name: &str) -> Result<CapabilityId> {
        self.validate_name(name)?;
        let caller = self.caller(cpu)?;
        let procs = self.procs.lock();
        let process = procs.get(caller.pid).ok_or(Error::UnknownProcess)?;
        let mut inner = process.inner.lock();
        if find(&inner.capabilities, name).is_some() {
            return Err(Error::AlreadyExists);
        }
        let id = self.ids.capability()?;
        inner.capabilities.push(Capability::new(id, name));
        debug!(target: "cap", "process {} created capability {id} '{name}'", caller.pid);
        Ok(id)
    }

    /// Grants the caller's capability `name` to process `dst`.
    pub fn share_capability(&self, cpu: CpuId, dst: ProcessId, name: &str) -> Result<()> {
        let caller = self.caller(cpu)?;
        let procs = self.procs.lock();
        if procs.find(dst).is_none() {
            return Err(Error::UnknownProcess);
        }
        let process = procs.get(caller.pid).ok_or(Error::UnknownProcess)?;
        let mut inner = process.inner.lock();
        let cap = find_mut(&mut inner.capabilities, name).ok_or(Error::UnknownCapability)?;
        if cap.grant(dst) {
            debug!(target: "cap", "process {} shared '{name}' with {dst}", caller.pid);
        }
        Ok(())
    }

    /// Withdraws a grant made by `share_capability`.
    ///
    /// Gates future `open_pipe` calls only; an attached peer stays attached.
    pub fn revoke_capability(&self, cpu: CpuId, dst: ProcessId, name: &str) -> Result<()> {
        let caller = self.caller(cpu)?;
        let procs = self.procs.lock();
        if procs.find(dst).is_none() {
            return Err(Error::UnknownProcess);
        }
        let process = procs.get(caller.pid).ok_or(Error::UnknownProcess)?;
        let mut inner = process.inner.lock();
        let cap = find_mut(&mut inner.capabilities, name).ok_or(Error::UnknownCapability)?;
        if !cap.revoke(dst) {
            return Err(Error::Unauthorized);
        }
        debug!(target: "cap", "process {} revoked '{name}' from {dst}", caller.pid);
        Ok(())
    }
}

/// Whether `pid` holds a grant of capability `name` owned by `owner`.
pub(crate) fn granted(owner: &Process, name: &str, pid: ProcessId) -> bool {
    let inner = owner.inner.lock();
    find(&inner.capabilities, name).is_some_and(|cap| cap.is_granted(pid))
}

#[cfg(test)]
mod tests_prop;
