// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! System information queries.

/// Fallback when `sysconf` cannot report a page size.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Minimum unit the kernel allocates and maps shared memory in.
///
/// Mapping offsets are aligned down to this value. Region sizes are not:
/// a region always reports the size it was created with.
pub fn vm_allocation_granularity() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        size as usize
    }
}
