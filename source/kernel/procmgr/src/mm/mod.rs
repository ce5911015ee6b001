// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page granularity and exclusively-owned aligned state buffers
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PAGE_SIZE, pages_for, page_span, StateBuffer
//! DEPENDS_ON: alloc
//! INVARIANTS: A StateBuffer is never aliased; its base honours the requested alignment

extern crate alloc;

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use crate::error::{Error, Result};

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Number of pages needed to back `bytes`.
#[inline]
pub const fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Page-granular length of a mapping that covers `bytes`.
#[inline]
pub const fn page_span(bytes: usize) -> usize {
    pages_for(bytes) * PAGE_SIZE
}

/// Zero-initialised heap buffer with a caller-chosen alignment.
///
/// Used for floating-point save areas (whose alignment is dictated by the FPU
/// collaborator) and for task kernel stacks.
pub struct StateBuffer {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: the buffer is uniquely owned; access goes through `&self`/`&mut self`.
unsafe impl Send for StateBuffer {}
// SAFETY: shared references only hand out `&[u8]`.
unsafe impl Sync for StateBuffer {}

impl StateBuffer {
    /// Allocates `len` zeroed bytes aligned to `align`.
    ///
    /// `align` must be a power of two. A zero-length request still reserves one
    /// aligned byte so the base address is a real allocation.
    pub fn zeroed(len: usize, align: usize) -> Result<Self> {
        let layout =
            Layout::from_size_align(len.max(1), align.max(1)).map_err(|_| Error::InvalidArgument)?;
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::OutOfMemory)?;
        Ok(Self { ptr, len, layout })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Base address of the buffer.
    #[inline]
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// One past the last byte; the initial stack pointer when used as a stack.
    #[inline]
    pub fn top(&self) -> usize {
        self.base() + self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr covers at least `len` initialised bytes owned by self.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for StateBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by `alloc_zeroed` with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl core::fmt::Debug for StateBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateBuffer")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("len", &self.len)
            .field("align", &self.align())
            .finish()
    }
}
