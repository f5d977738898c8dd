// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Platform handle backends.
//!
//! The concrete handle type is chosen at build time per target OS; the
//! region never dispatches dynamically over backends.

use crate::config::ShmemConfig;
use crate::error::SharedMemoryError;
use crate::mode::Mode;

#[cfg(unix)]
mod posix;

#[cfg(unix)]
pub use posix::FdPair;

/// Owned OS resource backing a region on this target.
#[cfg(unix)]
pub type PlatformHandle = FdPair;

#[cfg(not(unix))]
compile_error!("shmem-core supports Unix targets only");

/// Capability set every backend provides. Release is `Drop`.
pub(crate) trait HandleOps: Sized + Default {
    /// Allocate a new resource of at least `size` bytes, shaped for `mode`.
    fn acquire(config: &ShmemConfig, mode: Mode, size: usize) -> Result<Self, SharedMemoryError>;

    /// Independent reference to the same underlying resource.
    fn duplicate(&self) -> Result<Self, SharedMemoryError>;

    /// Re-derive the handle so its OS permissions match `target`, releasing
    /// anything that is no longer needed immediately.
    fn restrict(&mut self, target: Mode) -> Result<(), SharedMemoryError>;

    /// Whether the descriptor count matches what `mode` requires. Pure
    /// bookkeeping; no system calls.
    fn has_shape_of(&self, mode: Mode) -> bool;
}

/// OS-level inspection used by the permission verifier.
#[cfg(unix)]
pub(crate) fn check_permissions(handle: &PlatformHandle, mode: Mode, size: usize) -> bool {
    posix::check_permissions(handle, mode, size)
}

/// Whether the descriptor's access mode is read-only.
#[cfg(unix)]
pub(crate) fn is_read_only_descriptor(fd: std::os::fd::BorrowedFd<'_>) -> std::io::Result<bool> {
    posix::is_read_only_descriptor(fd)
}
