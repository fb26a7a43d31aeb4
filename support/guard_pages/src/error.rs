// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error reporting and the fatal termination boundary.

use std::borrow::Cow;
use std::cell::Cell;
use std::io;
use thiserror::Error;

/// A failed page operation.
///
/// The `Display` output combines the failed OS call, the requested size and
/// the OS error text, and is the message printed when the process is
/// terminated by [`abort`].
#[derive(Debug, Error)]
pub enum Error {
    /// The OS could not create a mapping.
    #[error("{op}({size}) failed: {}", error_text(.source))]
    Map {
        /// The OS call that failed.
        op: &'static str,
        /// The requested size in bytes.
        size: usize,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// The zero device backing the fallback mapping could not be opened.
    /// Always fatal, even for creation requests that may otherwise fail softly.
    #[error("open() on /dev/zero failed: {}", error_text(.0))]
    OpenZeroDevice(#[source] io::Error),
    /// The OS could not remove a mapping.
    #[error("{op}({size}) failed: {}", error_text(.source))]
    Unmap {
        /// The OS call that failed.
        op: &'static str,
        /// The requested size in bytes.
        size: usize,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// The OS refused an access-mode change.
    #[error(
        "{op}({size}) failed: {}; the process may be limited in the number of distinct page mappings it may hold",
        error_text(.source)
    )]
    Protect {
        /// The OS call that failed.
        op: &'static str,
        /// The size of the sub-extent being changed.
        size: usize,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// The OS could not describe the region containing an address.
    #[error("VirtualQuery({address:#x}) failed: {}", error_text(.source))]
    Query {
        /// The address being queried.
        address: usize,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// Committed pages could not be returned to the OS.
    #[error("VirtualFree({size}, MEM_DECOMMIT) failed: {}", error_text(.source))]
    Decommit {
        /// The size of the committed sub-extent.
        size: usize,
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// An address space reservation could not be released.
    #[error("VirtualFree(MEM_RELEASE) failed: {}", error_text(.source))]
    Release {
        /// The OS error.
        #[source]
        source: io::Error,
    },
    /// The platform reported a protection change that covers no bytes or more
    /// bytes than were requested.
    #[error(
        "protection change at {address:#x} covered {chunk} bytes with {remaining} bytes remaining"
    )]
    InvalidChunk {
        /// The start of the sub-extent.
        address: usize,
        /// The number of bytes the platform claims to have covered.
        chunk: usize,
        /// The number of bytes still to be covered.
        remaining: usize,
    },
}

/// The failure classes of the page layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A create or delete request could not be satisfied. Callers may choose
    /// to survive creation failures.
    Mapping,
    /// An access-mode change was refused. Always fatal.
    Protection,
    /// Region metadata needed to walk a range was unavailable. Always fatal.
    Query,
}

impl Error {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Map { .. }
            | Error::OpenZeroDevice(_)
            | Error::Unmap { .. }
            | Error::Decommit { .. }
            | Error::Release { .. } => ErrorKind::Mapping,
            Error::Protect { .. } => ErrorKind::Protection,
            Error::Query { .. } | Error::InvalidChunk { .. } => ErrorKind::Query,
        }
    }
}

thread_local! {
    static FORMATTING: Cell<bool> = const { Cell::new(false) };
}

/// Returns a human-readable description of `error`.
///
/// The OS's own message is preferred. When it is unavailable, or when this
/// function is re-entered while producing it, a static table of common error
/// names is used instead.
pub fn error_text(error: &io::Error) -> Cow<'static, str> {
    let Some(code) = error.raw_os_error() else {
        return Cow::Owned(error.to_string());
    };
    let native = FORMATTING.with(|formatting| {
        if formatting.replace(true) {
            return None;
        }
        let text = native_text(code);
        formatting.set(false);
        text
    });
    match native {
        Some(text) => Cow::Owned(text),
        None => fallback_text(code),
    }
}

/// Returns a human-readable description of the calling thread's most recent
/// OS error.
pub fn last_error_text() -> String {
    error_text(&io::Error::last_os_error()).into_owned()
}

fn native_text(code: i32) -> Option<String> {
    let text = io::Error::from_raw_os_error(code).to_string();
    // Strip the " (os error N)" suffix the standard library appends.
    let text = match text.rfind(" (os error ") {
        Some(index) => &text[..index],
        None => &text,
    };
    let text = text.trim_end();
    if text.is_empty() || text.starts_with("Unknown error") {
        return None;
    }
    Some(text.to_owned())
}

#[cfg(unix)]
fn fallback_text(code: i32) -> Cow<'static, str> {
    let text = match code {
        libc::EPERM => "Operation not permitted",
        libc::ENOENT => "No such file or directory",
        libc::EINTR => "Interrupted system call",
        libc::ENXIO => "No such device or address",
        libc::EBADF => "Bad file descriptor",
        libc::EAGAIN => "Resource temporarily unavailable",
        libc::ENOMEM => "Cannot allocate memory",
        libc::EACCES => "Permission denied",
        libc::EFAULT => "Bad address",
        libc::ENODEV => "No such device",
        libc::EINVAL => "Invalid argument",
        libc::ENFILE => "Too many open files in system",
        libc::EMFILE => "Too many open files",
        libc::EOVERFLOW => "Value too large for defined data type",
        _ => return Cow::Owned(format!("error {code}")),
    };
    Cow::Borrowed(text)
}

#[cfg(windows)]
fn fallback_text(code: i32) -> Cow<'static, str> {
    use windows_sys::Win32::Foundation;

    let text = match code as u32 {
        Foundation::ERROR_ACCESS_DENIED => "Access is denied",
        Foundation::ERROR_NOT_ENOUGH_MEMORY => "Not enough memory resources are available",
        Foundation::ERROR_OUTOFMEMORY => "Not enough storage is available",
        Foundation::ERROR_INVALID_PARAMETER => "The parameter is incorrect",
        Foundation::ERROR_INVALID_ADDRESS => "Attempt to access invalid address",
        Foundation::ERROR_COMMITMENT_LIMIT => "The paging file is too small",
        _ => return Cow::Owned(format!("error {code}")),
    };
    Cow::Borrowed(text)
}

/// Reports `error` and terminates the process.
///
/// This is the only place the page layer ends the process. Nothing is cleaned
/// up beyond what the OS does on process exit.
pub fn abort(error: &Error) -> ! {
    tracing::error!(
        error = error as &dyn std::error::Error,
        "fatal page operation failure"
    );
    eprintln!("guard_pages: {error}");
    std::process::abort()
}

/// Terminates the process on a page operation failure.
pub trait OrAbort<T> {
    /// Returns the success value, or reports the error with [`abort`].
    fn or_abort(self) -> T;
}

impl<T> OrAbort<T> for Result<T, Error> {
    fn or_abort(self) -> T {
        self.unwrap_or_else(|error| abort(&error))
    }
}
