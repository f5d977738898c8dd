// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory regions.
//!
//! Region lifecycle, mapping-range validation, mapping, and verification of
//! handles received from other processes.

mod mapping;
mod region;
mod validator;
mod verifier;

pub use mapping::{MappingRequest, SharedMemoryMapping};
pub use region::SharedMemoryRegion;
pub use validator::{RegionValidator, MAX_REGION_SIZE};
pub use verifier::check_permissions_correspond_to_mode;
