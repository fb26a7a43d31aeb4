// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::NativePlatform;
use crate::Platform;
use std::sync::OnceLock;

static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Returns the number of bytes in one virtual-memory page.
///
/// The OS is queried on first use and the result is cached for the lifetime
/// of the process.
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| NativePlatform::default().page_size())
}

/// Returns whether `value` is a multiple of `page_size`, which must be a power
/// of two.
pub fn is_page_aligned(value: usize, page_size: usize) -> bool {
    debug_assert!(page_size.is_power_of_two(), "bad page size {page_size}");
    value & (page_size - 1) == 0
}

/// Rounds `size` up to a multiple of `page_size`, which must be a power of
/// two, or returns `None` on overflow.
pub fn round_up_to_page(size: usize, page_size: usize) -> Option<usize> {
    debug_assert!(page_size.is_power_of_two(), "bad page size {page_size}");
    Some(size.checked_add(page_size - 1)? & !(page_size - 1))
}
