// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Page mapping and protection primitives for red-zone allocators.
//!
//! A red-zone allocator surrounds each user buffer with pages that cannot be
//! read or written, so that an overrun faults at the offending instruction
//! instead of silently corrupting a neighbor. This crate provides the layer
//! underneath such an allocator: it creates and deletes whole pages of
//! anonymous memory and flips page ranges between read-write and no-access.
//!
//! All OS-specific behavior lives behind the [`Platform`] trait. Callers hold a
//! [`PageMapper`], which carries the placement hint used to lay successive
//! mappings out contiguously, and see only four operations:
//! [`create`](PageMapper::create), [`delete`](PageMapper::delete),
//! [`allow_access`](PageMapper::allow_access) and
//! [`deny_access`](PageMapper::deny_access).
//!
//! Failures that would invalidate the guard-page guarantee are returned as
//! [`Error`] values. They are not recoverable; the caller is expected to pass
//! them to [`abort`] (or use [`OrAbort::or_abort`]) at its top-level boundary.

mod error;
mod mapper;
mod page_size;
mod platform;

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

pub use error::Error;
pub use error::ErrorKind;
pub use error::OrAbort;
pub use error::abort;
pub use error::error_text;
pub use error::last_error_text;
pub use mapper::FailurePolicy;
pub use mapper::PageMapper;
pub use page_size::is_page_aligned;
pub use page_size::page_size;
pub use page_size::round_up_to_page;
pub use platform::Access;
pub use platform::NativePlatform;
pub use platform::PlacementHint;
pub use platform::Platform;
