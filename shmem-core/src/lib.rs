// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmem Core Library
//!
//! Platform shared memory regions with an enforced access-mode contract:
//! creation, one-shot conversion to read-only or unsafe, duplication,
//! ownership transfer, validated mapping, and verification of handles
//! received from other processes.

pub mod config;
pub mod error;
pub mod mode;
pub mod platform;
pub mod precondition;
pub mod shm;
pub mod sys;
pub mod transfer;
pub mod types;

// Re-export commonly used types
pub use config::{Backend, ConfigLoader, ShmemConfig};
pub use error::{HardValidationError, SharedMemoryError, ShmemError, ShmemResult, TransferError};
pub use mode::Mode;
pub use platform::PlatformHandle;
pub use precondition::PreconditionViolation;
pub use shm::{
    check_permissions_correspond_to_mode, MappingRequest, SharedMemoryMapping, SharedMemoryRegion,
};
pub use types::RegionId;
