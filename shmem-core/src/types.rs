// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for region metadata.
//!
//! A region identifier is assigned once at creation and then only copied:
//! duplicates and regions rebuilt with `take` carry the same value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit identifier correlating a region with its copies across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(Uuid);

impl RegionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero identifier carried by invalid regions.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Rebuild an identifier received out of band.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Lowercase hex without hyphens, used when building shm_open names.
    pub fn simple(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self::nil()
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RegionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for RegionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<RegionId> for u128 {
    fn from(id: RegionId) -> Self {
        id.as_u128()
    }
}
