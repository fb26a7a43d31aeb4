// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! POSIX implementations of [`Platform`].

// UNSAFETY: Calling mmap, mprotect and munmap on caller-provided ranges.
#![expect(unsafe_code)]

use crate::Access;
use crate::Error;
use crate::PlacementHint;
use crate::Platform;
use parking_lot::Mutex;
use std::ffi::c_int;
use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::OnceLock;

/// Used when the OS reports a nonsensical page size.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Private anonymous mappings (`MAP_ANONYMOUS`).
#[derive(Debug, Default, Copy, Clone)]
pub struct Anonymous;

/// Private mappings of `/dev/zero`, for systems without `MAP_ANONYMOUS`.
///
/// The device is opened on first use and kept open for the rest of the
/// process. Mappings are indistinguishable from [`Anonymous`] ones.
#[derive(Debug, Default, Copy, Clone)]
pub struct DevZero;

static ZERO_DEVICE: OnceLock<fs_err::File> = OnceLock::new();
static ZERO_DEVICE_OPEN: Mutex<()> = Mutex::new(());

fn zero_device() -> Result<&'static fs_err::File, Error> {
    if let Some(file) = ZERO_DEVICE.get() {
        return Ok(file);
    }
    let _guard = ZERO_DEVICE_OPEN.lock();
    if let Some(file) = ZERO_DEVICE.get() {
        return Ok(file);
    }
    let file = fs_err::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/zero")
        .map_err(Error::OpenZeroDevice)?;
    tracing::debug!("opened /dev/zero for page mappings");
    Ok(ZERO_DEVICE.get_or_init(|| file))
}

fn query_page_size() -> usize {
    // SAFETY: sysconf has no memory-safety requirements.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        tracing::warn!(
            size,
            fallback = FALLBACK_PAGE_SIZE,
            "sysconf(_SC_PAGESIZE) failed"
        );
        FALLBACK_PAGE_SIZE
    }
}

fn map(hint: PlacementHint, size: usize, flags: c_int, fd: RawFd) -> Result<NonNull<u8>, Error> {
    // SAFETY: Creating a new private mapping. MAP_FIXED is not passed, so the
    // hint cannot replace an existing mapping.
    let ptr = unsafe {
        libc::mmap(
            hint.as_ptr().cast(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            flags,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(Error::Map {
            op: "mmap",
            size,
            source: io::Error::last_os_error(),
        });
    }
    tracing::trace!(?ptr, size, hinted = hint.address().is_some(), "mapped pages");
    NonNull::new(ptr.cast()).ok_or_else(|| Error::Map {
        op: "mmap",
        size,
        source: io::Error::from_raw_os_error(libc::ENOMEM),
    })
}

/// # Safety
/// The caller must own the mappings covering the range.
unsafe fn protect(address: *mut u8, size: usize, access: Access) -> Result<usize, Error> {
    let prot = match access {
        Access::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        Access::NoAccess => libc::PROT_NONE,
    };
    // SAFETY: guaranteed by caller.
    if unsafe { libc::mprotect(address.cast(), size, prot) } < 0 {
        return Err(Error::Protect {
            op: "mprotect",
            size,
            source: io::Error::last_os_error(),
        });
    }
    tracing::trace!(?address, size, ?access, "changed page protection");
    Ok(size)
}

/// # Safety
/// The caller must own the mappings covering the range.
unsafe fn unmap(address: *mut u8, size: usize) -> Result<(), Error> {
    // SAFETY: guaranteed by caller.
    if unsafe { libc::munmap(address.cast(), size) } < 0 {
        return Err(Error::Unmap {
            op: "munmap",
            size,
            source: io::Error::last_os_error(),
        });
    }
    tracing::trace!(?address, size, "unmapped pages");
    Ok(())
}

impl Platform for Anonymous {
    const UNMAP_DEGRADES_TO_DENY: bool = true;

    fn page_size(&self) -> usize {
        query_page_size()
    }

    fn map(&self, hint: PlacementHint, size: usize) -> Result<NonNull<u8>, Error> {
        map(hint, size, libc::MAP_PRIVATE | libc::MAP_ANONYMOUS, -1)
    }

    unsafe fn protect(
        &self,
        address: *mut u8,
        size: usize,
        access: Access,
    ) -> Result<usize, Error> {
        // SAFETY: guaranteed by caller.
        unsafe { protect(address, size, access) }
    }

    unsafe fn unmap(&self, address: *mut u8, size: usize) -> Result<(), Error> {
        // SAFETY: guaranteed by caller.
        unsafe { unmap(address, size) }
    }
}

impl Platform for DevZero {
    const UNMAP_DEGRADES_TO_DENY: bool = true;

    fn page_size(&self) -> usize {
        query_page_size()
    }

    fn map(&self, hint: PlacementHint, size: usize) -> Result<NonNull<u8>, Error> {
        let device = zero_device()?;
        map(hint, size, libc::MAP_PRIVATE, device.file().as_raw_fd())
    }

    unsafe fn protect(
        &self,
        address: *mut u8,
        size: usize,
        access: Access,
    ) -> Result<usize, Error> {
        // SAFETY: guaranteed by caller.
        unsafe { protect(address, size, access) }
    }

    unsafe fn unmap(&self, address: *mut u8, size: usize) -> Result<(), Error> {
        // SAFETY: guaranteed by caller.
        unsafe { unmap(address, size) }
    }
}
