// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Handle permission verification.
//!
//! A process receiving a handle from a less-trusted peer must not believe
//! the peer's mode claim. This check derives the mode from the kernel's view
//! of the descriptors and compares.

use crate::mode::Mode;
use crate::platform::{self, PlatformHandle};
use crate::shm::validator::RegionValidator;

/// Returns true iff the OS permissions of `handle` have exactly the shape of
/// `mode` and the underlying object holds at least `size` bytes.
///
/// Shapes are mutually exclusive, so at most one mode passes for any handle.
pub fn check_permissions_correspond_to_mode(
    handle: &PlatformHandle,
    mode: Mode,
    size: usize,
) -> bool {
    if let Err(e) = RegionValidator::validate_size(size) {
        tracing::warn!(
            claimed = %mode,
            size = size,
            error = %e,
            "Rejecting handle with invalid size"
        );
        return false;
    }

    platform::check_permissions(handle, mode, size)
}
