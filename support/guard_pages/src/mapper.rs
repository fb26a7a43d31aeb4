// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Page creation, deletion and protection on top of a [`Platform`].

// UNSAFETY: Changing the protection of and unmapping caller-owned ranges.
#![expect(unsafe_code)]

use crate::Access;
use crate::Error;
use crate::NativePlatform;
use crate::PlacementHint;
use crate::Platform;
use crate::error::error_text;
use std::ptr::NonNull;

/// What [`PageMapper::create`] does when the OS cannot provide memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Return the failure as an error to be passed to [`abort`](crate::abort).
    pub exit_on_fail: bool,
    /// Emit a warning before returning `None`. Ignored when `exit_on_fail` is
    /// set.
    pub print_on_fail: bool,
}

impl FailurePolicy {
    /// Failures are fatal.
    pub const FATAL: Self = Self {
        exit_on_fail: true,
        print_on_fail: false,
    };
    /// Failures are logged and reported as `None`.
    pub const WARN: Self = Self {
        exit_on_fail: false,
        print_on_fail: true,
    };
    /// Failures are reported as `None` only.
    pub const SILENT: Self = Self {
        exit_on_fail: false,
        print_on_fail: false,
    };
}

/// Creates, deletes and protects page-backed memory.
///
/// Regions are not tracked once created: the caller owns each returned
/// `(address, size)` pair and must pass the same values back to the
/// protection and deletion calls. Sizes should be multiples of
/// [`page_size`](Self::page_size); they are not rounded here.
///
/// The mapper carries the [`PlacementHint`] that lays successive regions out
/// contiguously, so callers that need independent layouts (tests, separate
/// allocators) use separate mappers.
#[derive(Debug)]
pub struct PageMapper<P = NativePlatform> {
    platform: P,
    page_size: usize,
    hint: PlacementHint,
}

impl PageMapper {
    /// Returns a mapper for the current OS.
    pub fn new() -> Self {
        Self::with_platform(NativePlatform::default())
    }
}

impl<P: Platform> PageMapper<P> {
    /// Returns a mapper using `platform`.
    pub fn with_platform(platform: P) -> Self {
        let page_size = platform.page_size();
        Self {
            platform,
            page_size,
            hint: PlacementHint::none(),
        }
    }

    /// The platform this mapper calls into.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The number of bytes in one page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The address the next [`create`](Self::create) will suggest to the OS.
    pub fn hint(&self) -> PlacementHint {
        self.hint
    }

    /// Replaces the placement hint.
    pub fn set_hint(&mut self, hint: PlacementHint) {
        self.hint = hint;
    }

    /// Creates `size` bytes of zero-filled, read-write memory.
    ///
    /// Returns `Ok(None)` when the OS cannot satisfy the request and `policy`
    /// does not make the failure fatal. With [`FailurePolicy::exit_on_fail`]
    /// the failure is returned as an error instead.
    ///
    /// A zero device that cannot be opened is always returned as an error,
    /// whatever `policy` says.
    pub fn create(
        &mut self,
        size: usize,
        policy: FailurePolicy,
    ) -> Result<Option<NonNull<u8>>, Error> {
        let hint = std::mem::take(&mut self.hint);
        match self.platform.map(hint, size) {
            Ok(base) => {
                self.hint = PlacementHint::after(base, size);
                Ok(Some(base))
            }
            Err(err @ Error::OpenZeroDevice(_)) => Err(err),
            Err(err) => {
                if policy.exit_on_fail {
                    Err(err)
                } else {
                    if policy.print_on_fail {
                        tracing::warn!(
                            error = &err as &dyn std::error::Error,
                            size,
                            "page creation failed"
                        );
                    }
                    Ok(None)
                }
            }
        }
    }

    /// Removes a region created by [`create`](Self::create) from the address
    /// space.
    ///
    /// On POSIX systems a failed unmap falls back to denying all access to the
    /// range, which leaves the address space reserved but keeps freed memory
    /// inaccessible.
    ///
    /// # Safety
    /// `address` and `size` must describe memory obtained from `create` on
    /// this mapper's platform, and nothing may access it afterwards.
    pub unsafe fn delete(&self, address: NonNull<u8>, size: usize) -> Result<(), Error> {
        // SAFETY: guaranteed by caller.
        let result = unsafe { self.platform.unmap(address.as_ptr(), size) };
        match result {
            Err(Error::Unmap { op, source, .. }) if P::UNMAP_DEGRADES_TO_DENY => {
                tracing::warn!(
                    op,
                    size,
                    error = %error_text(&source),
                    "unmap failed, denying access instead"
                );
                // SAFETY: guaranteed by caller.
                unsafe { self.deny_access(address, size) }
            }
            result => result,
        }
    }

    /// Makes `[address, address + size)` readable and writable.
    ///
    /// # Safety
    /// The range must lie within regions created by this mapper and not yet
    /// deleted.
    pub unsafe fn allow_access(&self, address: NonNull<u8>, size: usize) -> Result<(), Error> {
        // SAFETY: guaranteed by caller.
        unsafe { self.protect(address, size, Access::ReadWrite) }
    }

    /// Makes any access to `[address, address + size)` fault.
    ///
    /// # Safety
    /// The range must lie within regions created by this mapper and not yet
    /// deleted, and nothing may rely on accessing it until access is allowed
    /// again.
    pub unsafe fn deny_access(&self, address: NonNull<u8>, size: usize) -> Result<(), Error> {
        // SAFETY: guaranteed by caller.
        unsafe { self.protect(address, size, Access::NoAccess) }
    }

    /// Applies `access` to the whole range, one OS-reported sub-extent at a
    /// time.
    ///
    /// # Safety
    /// See [`deny_access`](Self::deny_access).
    pub unsafe fn protect(
        &self,
        address: NonNull<u8>,
        size: usize,
        access: Access,
    ) -> Result<(), Error> {
        let mut address = address.as_ptr();
        let mut remaining = size;
        while remaining > 0 {
            // SAFETY: guaranteed by caller; the sub-extent lies within the
            // caller's range.
            let chunk = unsafe { self.platform.protect(address, remaining, access)? };
            if chunk == 0 || chunk > remaining {
                return Err(Error::InvalidChunk {
                    address: address as usize,
                    chunk,
                    remaining,
                });
            }
            address = address.wrapping_add(chunk);
            remaining -= chunk;
        }
        Ok(())
    }
}
