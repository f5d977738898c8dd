// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Precondition violations.
//!
//! These are contract breaks by the caller, not runtime failures. They are
//! deliberately not convertible into `ShmemError`: the only thing a violation
//! can do is abort the process.

use std::fmt;

use crate::mode::Mode;

/// A caller broke the mode contract of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionViolation {
    /// `create` was asked for a read-only region.
    CreateReadOnly,
    /// `duplicate` was called on a writable region.
    DuplicateWritable,
    /// `convert_to_read_only` was called on a non-writable region.
    ConvertNonWritableToReadOnly { from: Mode },
    /// `convert_to_unsafe` was called on a non-writable region.
    ConvertNonWritableToUnsafe { from: Mode },
}

impl PreconditionViolation {
    /// Diagnostic printed before aborting.
    pub const fn message(&self) -> &'static str {
        match self {
            Self::CreateReadOnly => {
                "Creating a region in read-only mode will lead to this region being non-modifiable"
            }
            Self::DuplicateWritable => "Duplicating a writable shared memory region is prohibited",
            Self::ConvertNonWritableToReadOnly { .. } => {
                "Only writable shared memory region can be converted to read-only"
            }
            Self::ConvertNonWritableToUnsafe { .. } => {
                "Only writable shared memory region can be converted to unsafe"
            }
        }
    }

    /// Terminate the process. Unwinding is not used, so a violation cannot
    /// be caught with `catch_unwind`.
    #[cold]
    pub fn abort(self) -> ! {
        if cfg!(feature = "official-build") {
            tracing::error!("Shared memory precondition violated");
        } else {
            tracing::error!(violation = ?self, "{}", self.message());
            eprintln!("shmem precondition violation: {}", self.message());
        }
        std::process::abort()
    }
}

impl fmt::Display for PreconditionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}
