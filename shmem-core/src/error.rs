// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for shmem.
//!
//! Every recoverable failure is an explicit enum variant. Precondition
//! violations are NOT errors: they live in [`crate::precondition`] and abort
//! the process instead of being returned.

use std::path::PathBuf;

use thiserror::Error;

use crate::mode::Mode;
use crate::types::RegionId;

/// Top-level error type for the shmem crate.
#[derive(Debug, Error)]
pub enum ShmemError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Region Errors - Reported as Invalid Regions / Mappings
    // =========================================================================
    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // Transfer Errors - Handles Crossing a Process Boundary
    // =========================================================================
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration errors that prevent a config from being used at all.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Backend '{backend}' is not available on this target")]
    UnsupportedBackend { backend: &'static str },
}

/// Recoverable region and mapping failures.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Region size must be non-zero")]
    ZeroSize,

    #[error("Region size {size} exceeds maximum {max}")]
    SizeTooLarge { size: usize, max: usize },

    #[error("Operation on an invalid shared memory region")]
    InvalidRegion,

    #[error("Handle shape does not match claimed mode {mode}")]
    HandleShapeMismatch { mode: Mode },

    #[error("Mapping size must be non-zero")]
    ZeroMappingSize,

    #[error("Mapping offset {offset} + size {size} overflows")]
    MappingOverflow { offset: usize, size: usize },

    #[error("Mapping [{offset}, {offset}+{size}) exceeds region size {region_size}")]
    MappingOutOfBounds {
        offset: usize,
        size: usize,
        region_size: usize,
    },

    #[error("Mapping of region {guid} is read-only")]
    ReadOnlyMapping { guid: RegionId },

    #[error("Failed to create shared memory region: {reason}")]
    CreateFailed { reason: String },

    #[error("Failed to duplicate platform handle: {source}")]
    DuplicateFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("System call failed: {syscall} - {source}")]
    Syscall {
        syscall: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while sending or receiving a region over a socket.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Socket operation '{operation}' failed: {source}")]
    Socket {
        operation: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("Frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("Frame checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Invalid region metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Expected {expected} descriptors, received {actual}")]
    DescriptorCount { expected: usize, actual: usize },

    #[error("Received handle could not be reconstructed into a valid region")]
    InvalidRegion,

    #[error("Received handle permissions do not correspond to claimed mode {mode}")]
    PermissionMismatch { mode: Mode },
}

/// Result type alias using ShmemError.
pub type ShmemResult<T> = Result<T, ShmemError>;
