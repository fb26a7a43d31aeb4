// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Windows implementation of [`Platform`].
//!
//! Windows tracks memory as reserved address space with committed pages inside
//! it. A caller's range can cross several OS regions with different states, so
//! protection changes and deletion walk the range region by region as reported
//! by `VirtualQuery`.

// UNSAFETY: Calling the Virtual* memory APIs on caller-provided ranges.
#![expect(unsafe_code)]

use crate::Access;
use crate::Error;
use crate::PlacementHint;
use crate::Platform;
use std::io;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use windows_sys::Win32::System::Memory::MEM_COMMIT;
use windows_sys::Win32::System::Memory::MEM_DECOMMIT;
use windows_sys::Win32::System::Memory::MEM_RELEASE;
use windows_sys::Win32::System::Memory::MEM_RESERVE;
use windows_sys::Win32::System::Memory::MEMORY_BASIC_INFORMATION;
use windows_sys::Win32::System::Memory::PAGE_NOACCESS;
use windows_sys::Win32::System::Memory::PAGE_READWRITE;
use windows_sys::Win32::System::Memory::VirtualAlloc;
use windows_sys::Win32::System::Memory::VirtualFree;
use windows_sys::Win32::System::Memory::VirtualProtect;
use windows_sys::Win32::System::Memory::VirtualQuery;
use windows_sys::Win32::System::SystemInformation::GetSystemInfo;
use windows_sys::Win32::System::SystemInformation::SYSTEM_INFO;

/// Committed `VirtualAlloc` memory.
#[derive(Debug, Default, Copy, Clone)]
pub struct VirtualMemory;

/// Returns the OS region containing `address`.
fn query(address: *mut u8) -> Result<MEMORY_BASIC_INFORMATION, Error> {
    let mut info = MaybeUninit::<MEMORY_BASIC_INFORMATION>::uninit();
    // SAFETY: VirtualQuery only writes to the provided buffer, whose size is
    // passed along with it.
    let n = unsafe {
        VirtualQuery(
            address.cast_const().cast(),
            info.as_mut_ptr(),
            size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    if n < size_of::<MEMORY_BASIC_INFORMATION>() {
        return Err(Error::Query {
            address: address as usize,
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: VirtualQuery filled in the whole structure.
    Ok(unsafe { info.assume_init() })
}

impl Platform for VirtualMemory {
    const UNMAP_DEGRADES_TO_DENY: bool = false;

    fn page_size(&self) -> usize {
        let mut info = MaybeUninit::<SYSTEM_INFO>::uninit();
        // SAFETY: GetSystemInfo fills in the provided structure and cannot
        // fail.
        let info = unsafe {
            GetSystemInfo(info.as_mut_ptr());
            info.assume_init()
        };
        info.dwPageSize as usize
    }

    fn map(&self, _hint: PlacementHint, size: usize) -> Result<NonNull<u8>, Error> {
        // VirtualAlloc treats an address as a demand rounded down to the
        // allocation granularity, so the hint is not passed on.
        // SAFETY: Reserving and committing fresh memory at an address chosen
        // by the OS.
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
            return Err(Error::Map {
                op: "VirtualAlloc",
                size,
                source: io::Error::last_os_error(),
            });
        };
        tracing::trace!(?ptr, size, "allocated pages");
        Ok(ptr)
    }

    unsafe fn protect(
        &self,
        address: *mut u8,
        size: usize,
        access: Access,
    ) -> Result<usize, Error> {
        let info = query(address)?;
        let chunk = size.min(info.RegionSize);
        let protection = match access {
            Access::ReadWrite => PAGE_READWRITE,
            Access::NoAccess => PAGE_NOACCESS,
        };
        let mut old = 0;
        // SAFETY: guaranteed by caller.
        let r = unsafe {
            VirtualProtect(
                address.cast_const().cast(),
                chunk,
                protection,
                &mut old,
            )
        };
        if r == 0 {
            return Err(Error::Protect {
                op: "VirtualProtect",
                size: chunk,
                source: io::Error::last_os_error(),
            });
        }
        tracing::trace!(?address, chunk, ?access, "changed page protection");
        Ok(chunk)
    }

    unsafe fn unmap(&self, address: *mut u8, size: usize) -> Result<(), Error> {
        let mut current = address;
        let mut remaining = size;
        while remaining > 0 {
            let info = query(current)?;
            if info.State == MEM_COMMIT {
                // SAFETY: guaranteed by caller.
                let r = unsafe { VirtualFree(info.BaseAddress, info.RegionSize, MEM_DECOMMIT) };
                if r == 0 {
                    return Err(Error::Decommit {
                        size: info.RegionSize,
                        source: io::Error::last_os_error(),
                    });
                }
            }
            current = current.wrapping_add(info.RegionSize);
            remaining = remaining.saturating_sub(info.RegionSize);
        }
        // SAFETY: guaranteed by caller.
        if unsafe { VirtualFree(address.cast(), 0, MEM_RELEASE) } == 0 {
            return Err(Error::Release {
                source: io::Error::last_os_error(),
            });
        }
        tracing::trace!(?address, size, "released pages");
        Ok(())
    }
}
