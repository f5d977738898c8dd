// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared helpers for integration tests.

use std::os::fd::{AsRawFd, BorrowedFd};

use shmem_core::SharedMemoryRegion;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// True if the region's primary descriptor cannot back a writable shared
/// mapping.
#[allow(dead_code)]
pub fn handle_refuses_writable_mapping(region: &SharedMemoryRegion) -> bool {
    match region.platform_handle().fd() {
        Some(fd) => fd_refuses_writable_mapping(fd, region.size()),
        None => false,
    }
}

/// True if `fd` cannot back a writable shared mapping of `size` bytes.
#[allow(dead_code)]
pub fn fd_refuses_writable_mapping(fd: BorrowedFd<'_>, size: usize) -> bool {
    // SAFETY: fd is valid for the duration of the call; a successful mapping
    // is unmapped immediately
    unsafe {
        let ptr = libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.as_raw_fd(),
            0,
        );
        if ptr == libc::MAP_FAILED {
            return true;
        }
        libc::munmap(ptr, size);
    }
    false
}
