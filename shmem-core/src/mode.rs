// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Access mode state machine.
//!
//! Implements the region lifecycle: Writable → ReadOnly | Unsafe.
//! Both conversions are one-shot. Any other transition is a precondition
//! violation and aborts the process; it is never returned as an error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::precondition::PreconditionViolation;

/// Declared access contract of a shared memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Mappable read-write. Holds the auxiliary read-only descriptor so a
    /// read-only region can later be derived from it. Cannot be duplicated.
    Writable,

    /// Mappable read-only only. Terminal.
    ReadOnly,

    /// Mappable read-write by every holder. Can be duplicated. Terminal.
    Unsafe,
}

impl Mode {
    /// Get the mode name for diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Writable => "Writable",
            Self::ReadOnly => "ReadOnly",
            Self::Unsafe => "Unsafe",
        }
    }

    /// Whether a region may be created directly in this mode.
    pub const fn can_create(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Whether handles in this mode may be duplicated.
    pub const fn can_duplicate(&self) -> bool {
        !matches!(self, Self::Writable)
    }

    /// Check if conversion to the target mode is legal.
    pub fn can_transition_to(&self, target: Mode) -> bool {
        matches!(
            (self, target),
            (Self::Writable, Self::ReadOnly) | (Self::Writable, Self::Unsafe)
        )
    }

    /// Validate a conversion, returning the new mode or the violation.
    ///
    /// A `Writable` target is reported as a read-only conversion violation.
    pub fn transition_to(self, target: Mode) -> Result<Mode, PreconditionViolation> {
        if self.can_transition_to(target) {
            return Ok(target);
        }
        Err(match target {
            Self::Unsafe => PreconditionViolation::ConvertNonWritableToUnsafe { from: self },
            Self::ReadOnly | Self::Writable => {
                PreconditionViolation::ConvertNonWritableToReadOnly { from: self }
            }
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
