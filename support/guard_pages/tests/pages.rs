// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Exercises page creation and protection against the real OS.
//!
//! Accessibility is checked by asking the kernel to copy through the page
//! with `read(2)`/`write(2)` on a pipe, which fail with `EFAULT` instead of
//! faulting the test process.

#![cfg(unix)]
// UNSAFETY: Probing and protecting raw mappings.
#![expect(unsafe_code)]

use guard_pages::FailurePolicy;
use guard_pages::PageMapper;
use guard_pages::PlacementHint;
use guard_pages::Platform;
use guard_pages::unix::Anonymous;
use guard_pages::unix::DevZero;
use parking_lot::Mutex;
use std::io;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;
use std::sync::Arc;

struct Pipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl Pipe {
    fn new() -> Self {
        let mut fds = [0; 2];
        // SAFETY: pipe writes two new descriptors into the array.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        // SAFETY: the descriptors were just created and are owned here.
        unsafe {
            Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            }
        }
    }
}

fn expect_fault(n: isize) -> bool {
    if n == 1 {
        return true;
    }
    let err = io::Error::last_os_error();
    assert_eq!(err.raw_os_error(), Some(libc::EFAULT), "{err}");
    false
}

fn readable(address: *const u8) -> bool {
    let pipe = Pipe::new();
    // SAFETY: the kernel validates the source address.
    let n = unsafe { libc::write(pipe.write.as_raw_fd(), address.cast(), 1) };
    expect_fault(n)
}

fn writable(address: *mut u8) -> bool {
    let pipe = Pipe::new();
    let byte = 0x5a_u8;
    // SAFETY: writing one byte from a local.
    let n = unsafe { libc::write(pipe.write.as_raw_fd(), (&raw const byte).cast(), 1) };
    assert_eq!(n, 1);
    // SAFETY: the kernel validates the destination address.
    let n = unsafe { libc::read(pipe.read.as_raw_fd(), address.cast(), 1) };
    expect_fault(n)
}

/// Checks the first and last byte of every page in the range.
fn accessible(base: NonNull<u8>, size: usize, page_size: usize) -> Vec<bool> {
    (0..size / page_size)
        .map(|page| {
            let first = base.as_ptr().wrapping_add(page * page_size);
            let last = first.wrapping_add(page_size - 1);
            let states = [readable(first), writable(first), readable(last), writable(last)];
            assert!(
                states.iter().all(|&s| s == states[0]),
                "page {page} is partially accessible: {states:?}"
            );
            states[0]
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn is_mapped(base: NonNull<u8>, size: usize, page_size: usize) -> bool {
    let mut residency = vec![0u8; size.div_ceil(page_size)];
    // SAFETY: mincore writes one byte per page into the vector.
    let r = unsafe { libc::mincore(base.as_ptr().cast(), size, residency.as_mut_ptr()) };
    if r == 0 {
        return true;
    }
    let err = io::Error::last_os_error();
    assert_eq!(err.raw_os_error(), Some(libc::ENOMEM), "{err}");
    false
}

fn create_is_readable_and_writable<P: Platform>(platform: P) {
    let mut mapper = PageMapper::with_platform(platform);
    let page = mapper.page_size();
    for pages in [1, 2, 5] {
        let size = pages * page;
        let base = mapper.create(size, FailurePolicy::FATAL).unwrap().unwrap();
        assert_eq!(base.as_ptr() as usize % page, 0);
        {
            // SAFETY: the region was just created and is owned by this test.
            let bytes = unsafe { std::slice::from_raw_parts(base.as_ptr(), size) };
            assert!(bytes.iter().all(|&b| b == 0), "fresh pages are not zeroed");
        }
        assert_eq!(accessible(base, size, page), vec![true; pages]);
        // SAFETY: the region is owned by this test and not otherwise referenced.
        let bytes = unsafe { std::slice::from_raw_parts_mut(base.as_ptr(), size) };
        bytes.fill(0xcc);
        // SAFETY: no references into the region outlive this call.
        unsafe { mapper.delete(base, size).unwrap() };
        #[cfg(target_os = "linux")]
        assert!(!is_mapped(base, size, page));
    }
}

#[test]
fn anonymous_pages_are_accessible() {
    create_is_readable_and_writable(Anonymous);
}

#[test]
fn dev_zero_pages_are_accessible() {
    create_is_readable_and_writable(DevZero);
}

#[test]
fn deny_then_allow() {
    let mut mapper = PageMapper::new();
    let page = mapper.page_size();
    let size = 3 * page;
    let base = mapper.create(size, FailurePolicy::FATAL).unwrap().unwrap();
    // SAFETY: the region is owned by this test and not referenced.
    unsafe {
        mapper.deny_access(base, size).unwrap();
        assert_eq!(accessible(base, size, page), [false, false, false]);
        mapper.allow_access(base, size).unwrap();
        assert_eq!(accessible(base, size, page), [true, true, true]);
        mapper.delete(base, size).unwrap();
    }
}

#[test]
fn guard_page_after_buffer() {
    let mut mapper = PageMapper::new();
    let page = mapper.page_size();
    let base = mapper
        .create(2 * page, FailurePolicy::FATAL)
        .unwrap()
        .unwrap();
    let guard = NonNull::new(base.as_ptr().wrapping_add(page)).unwrap();
    // SAFETY: the region is owned by this test and not referenced.
    unsafe {
        mapper.deny_access(guard, page).unwrap();
        assert_eq!(accessible(base, 2 * page, page), [true, false]);
        mapper.delete(base, 2 * page).unwrap();
    }
    #[cfg(target_os = "linux")]
    assert!(!is_mapped(base, 2 * page, page));
}

#[test]
fn protection_spans_adjacent_regions() {
    let mut mapper = PageMapper::new();
    let page = mapper.page_size();
    let size = 2 * page;

    // Find a free stretch large enough for both regions, then force the hint
    // to its start.
    let probe = mapper
        .create(2 * size, FailurePolicy::FATAL)
        .unwrap()
        .unwrap();
    // SAFETY: the probe region is owned by this test and not referenced.
    unsafe { mapper.delete(probe, 2 * size).unwrap() };
    mapper.set_hint(PlacementHint::at(probe.as_ptr() as usize));

    let first = mapper.create(size, FailurePolicy::FATAL).unwrap().unwrap();
    let second = mapper.create(size, FailurePolicy::FATAL).unwrap().unwrap();
    if second.as_ptr() != first.as_ptr().wrapping_add(size) {
        // The hint is advisory; nothing to check if the OS ignored it.
        // SAFETY: both regions are owned by this test.
        unsafe {
            mapper.delete(first, size).unwrap();
            mapper.delete(second, size).unwrap();
        }
        return;
    }

    let middle = NonNull::new(first.as_ptr().wrapping_add(page)).unwrap();
    // SAFETY: the regions are owned by this test and not referenced.
    unsafe {
        mapper.deny_access(middle, size).unwrap();
        assert_eq!(accessible(first, 2 * size, page), [true, false, false, true]);
        mapper.allow_access(first, 2 * size).unwrap();
        assert_eq!(accessible(first, 2 * size, page), [true; 4]);
        mapper.delete(first, 2 * size).unwrap();
    }
    #[cfg(target_os = "linux")]
    assert!(!is_mapped(first, 2 * size, page));
}

#[test]
fn page_size_is_protection_granularity() {
    let mut mapper = PageMapper::new();
    let page = guard_pages::page_size();
    assert!(page > 0);
    assert_eq!(mapper.page_size(), page);

    let base = mapper.create(page, FailurePolicy::FATAL).unwrap().unwrap();
    assert_eq!(accessible(base, page, page), [true]);
    // SAFETY: the region is owned by this test and not referenced.
    unsafe { mapper.delete(base, page).unwrap() };

    // Linux requires protection changes to start on a page boundary.
    #[cfg(target_os = "linux")]
    {
        let base = mapper
            .create(2 * page, FailurePolicy::FATAL)
            .unwrap()
            .unwrap();
        let unaligned = NonNull::new(base.as_ptr().wrapping_add(page / 2)).unwrap();
        // SAFETY: the region is owned by this test and not referenced.
        unsafe {
            let err = mapper.deny_access(unaligned, page).unwrap_err();
            assert!(matches!(err, guard_pages::Error::Protect { .. }), "{err}");
            mapper.delete(base, 2 * page).unwrap();
        }
    }
}

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn exhaustion_with_warning_returns_none() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let capture = capture.clone();
            move || capture.clone()
        })
        .with_ansi(false)
        .finish();

    let mut mapper = PageMapper::new();
    let page = mapper.page_size();
    let huge = (usize::MAX / 2) & !(page - 1);
    tracing::subscriber::with_default(subscriber, || {
        assert!(mapper.create(huge, FailurePolicy::WARN).unwrap().is_none());
    });
    let output = String::from_utf8(capture.0.lock().clone()).unwrap();
    assert!(output.contains("page creation failed"), "{output}");
    assert!(output.contains(&format!("mmap({huge}) failed")), "{output}");

    // The mapper is still usable afterwards.
    let base = mapper.create(page, FailurePolicy::WARN).unwrap().unwrap();
    // SAFETY: the region is owned by this test and not referenced.
    unsafe { mapper.delete(base, page).unwrap() };
}

#[test]
fn exhaustion_can_be_fatal() {
    let mut mapper = PageMapper::new();
    let page = mapper.page_size();
    let huge = (usize::MAX / 2) & !(page - 1);
    let err = mapper.create(huge, FailurePolicy::FATAL).unwrap_err();
    assert_eq!(err.kind(), guard_pages::ErrorKind::Mapping);
    assert!(mapper.create(huge, FailurePolicy::SILENT).unwrap().is_none());
}
