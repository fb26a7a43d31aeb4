// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The OS capability interface.

// UNSAFETY: Declares the unsafe protection and unmapping entry points that
// each platform implements.
#![expect(unsafe_code)]

use crate::Error;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

/// The access mode of a page range.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    /// Reads and writes succeed.
    ReadWrite,
    /// Any read or write faults.
    NoAccess,
}

/// An advisory address for the next mapping.
///
/// After each successful mapping the hint points just past its end, which
/// biases the OS toward placing the next mapping adjacent to it. The OS is
/// free to ignore the hint.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PlacementHint(Option<NonZeroUsize>);

impl PlacementHint {
    /// No preference; the OS picks the address.
    pub const fn none() -> Self {
        Self(None)
    }

    /// Prefer `address` for the next mapping.
    pub const fn at(address: usize) -> Self {
        Self(NonZeroUsize::new(address))
    }

    /// The hint immediately following a mapping of `size` bytes at `base`.
    pub fn after(base: NonNull<u8>, size: usize) -> Self {
        Self::at((base.as_ptr() as usize).wrapping_add(size))
    }

    /// Returns the preferred address, if any.
    pub fn address(&self) -> Option<usize> {
        self.0.map(NonZeroUsize::get)
    }

    /// Returns the hint as a pointer suitable for passing to the OS, null when
    /// there is no preference.
    pub fn as_ptr(&self) -> *mut u8 {
        std::ptr::without_provenance_mut(self.address().unwrap_or(0))
    }
}

/// The page operations an OS family must provide.
///
/// Implementations translate each call into the native memory-management API
/// and capture the OS error text on failure. They do not log or terminate;
/// policy lives in [`PageMapper`](crate::PageMapper).
pub trait Platform {
    /// Whether a failed [`unmap`](Self::unmap) may be replaced by denying
    /// access to the range.
    ///
    /// This holds where the OS models the address space as plain mappings.
    /// Reserve/commit platforms report unmapping failures as fatal.
    const UNMAP_DEGRADES_TO_DENY: bool;

    /// Returns the number of bytes in one virtual-memory page.
    fn page_size(&self) -> usize;

    /// Maps `size` bytes of zero-filled, read-write, anonymous memory.
    fn map(&self, hint: PlacementHint, size: usize) -> Result<NonNull<u8>, Error>;

    /// Applies `access` to a prefix of `[address, address + size)`.
    ///
    /// Returns the number of bytes the change covered, which is non-zero and
    /// no larger than `size`. Callers loop until the whole range is covered.
    ///
    /// # Safety
    /// The range must lie within mappings created by [`map`](Self::map) and
    /// not yet unmapped, and nothing may rely on accessing pages that become
    /// inaccessible.
    unsafe fn protect(
        &self,
        address: *mut u8,
        size: usize,
        access: Access,
    ) -> Result<usize, Error>;

    /// Removes `[address, address + size)` from the address space.
    ///
    /// # Safety
    /// The range must have been returned by [`map`](Self::map), and no
    /// references into it may outlive this call.
    unsafe fn unmap(&self, address: *mut u8, size: usize) -> Result<(), Error>;
}

/// The platform implementation for the current target.
#[cfg(unix)]
pub type NativePlatform = crate::unix::Anonymous;

/// The platform implementation for the current target.
#[cfg(windows)]
pub type NativePlatform = crate::windows::VirtualMemory;
