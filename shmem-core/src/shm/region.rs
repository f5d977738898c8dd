// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedMemoryRegion - platform shared memory with an enforced access mode.
//!
//! A region owns its platform handle exclusively. Recoverable failures yield
//! an invalid region on which every later operation fails quietly; contract
//! violations (read-only creation, duplicating a writable region, converting
//! a non-writable region) abort the process.

use crate::config::ShmemConfig;
use crate::error::SharedMemoryError;
use crate::mode::Mode;
use crate::platform::{HandleOps, PlatformHandle};
use crate::precondition::PreconditionViolation;
use crate::shm::mapping::{MappingRequest, SharedMemoryMapping};
use crate::shm::validator::RegionValidator;
use crate::types::RegionId;

/// An OS shared memory resource plus its declared size, mode and identifier.
///
/// Valid iff it owns a platform handle. `Default` yields an invalid region.
#[derive(Debug)]
pub struct SharedMemoryRegion {
    handle: PlatformHandle,
    mode: Mode,
    /// Size requested at creation, never the OS-rounded allocation size.
    size: usize,
    guid: RegionId,
}

impl Default for SharedMemoryRegion {
    fn default() -> Self {
        Self {
            handle: PlatformHandle::default(),
            mode: Mode::ReadOnly,
            size: 0,
            guid: RegionId::nil(),
        }
    }
}

impl SharedMemoryRegion {
    /// Create a writable region, or an invalid one if `size` is rejected or
    /// allocation fails.
    pub fn create_writable(size: usize) -> Self {
        Self::create(Mode::Writable, size)
    }

    /// Create an unsafe region: every duplicate can map it read-write.
    pub fn create_unsafe(size: usize) -> Self {
        Self::create(Mode::Unsafe, size)
    }

    /// Create a region in `mode` with the default configuration.
    ///
    /// Aborts the process if `mode` is `ReadOnly`: such a region could never
    /// be populated. Read-only regions come from `convert_to_read_only`.
    pub fn create(mode: Mode, size: usize) -> Self {
        Self::create_with_config(&ShmemConfig::default(), mode, size)
    }

    pub fn create_with_config(config: &ShmemConfig, mode: Mode, size: usize) -> Self {
        Self::try_create(config, mode, size).unwrap_or_else(|e| {
            tracing::debug!(mode = %mode, size = size, error = %e, "Region creation failed");
            Self::default()
        })
    }

    /// Like [`create_with_config`](Self::create_with_config) but reports why
    /// creation failed. Still aborts on a read-only `mode`.
    pub fn try_create(
        config: &ShmemConfig,
        mode: Mode,
        size: usize,
    ) -> Result<Self, SharedMemoryError> {
        if !mode.can_create() {
            PreconditionViolation::CreateReadOnly.abort();
        }

        RegionValidator::validate_size(size)?;

        let handle = PlatformHandle::acquire(config, mode, size)?;
        let guid = RegionId::generate();

        tracing::debug!(
            guid = %guid,
            mode = %mode,
            size = size,
            backend = config.backend.name(),
            "Created shared memory region"
        );

        Ok(Self {
            handle,
            mode,
            size,
            guid,
        })
    }

    /// Rebuild a region from a handle received out of band.
    ///
    /// The metadata is re-validated; on failure the handle is released and
    /// an invalid region is returned. This does not prove the handle's OS
    /// permissions match `mode`; run
    /// [`check_permissions_correspond_to_mode`](crate::shm::check_permissions_correspond_to_mode)
    /// for handles from an untrusted peer.
    pub fn take(handle: PlatformHandle, mode: Mode, size: usize, guid: RegionId) -> Self {
        Self::try_take(handle, mode, size, guid).unwrap_or_else(|e| {
            tracing::debug!(guid = %guid, mode = %mode, size = size, error = %e, "Take failed");
            Self::default()
        })
    }

    pub fn try_take(
        handle: PlatformHandle,
        mode: Mode,
        size: usize,
        guid: RegionId,
    ) -> Result<Self, SharedMemoryError> {
        if !handle.is_valid() {
            return Err(SharedMemoryError::InvalidRegion);
        }

        RegionValidator::validate_size(size)?;

        if !handle.has_shape_of(mode) {
            return Err(SharedMemoryError::HandleShapeMismatch { mode });
        }

        tracing::debug!(guid = %guid, mode = %mode, size = size, "Took shared memory region");

        Ok(Self {
            handle,
            mode,
            size,
            guid,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Size requested at creation.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn guid(&self) -> RegionId {
        self.guid
    }

    /// Borrow the platform handle without taking ownership.
    pub fn platform_handle(&self) -> &PlatformHandle {
        &self.handle
    }

    /// Move the platform handle out, leaving this region invalid.
    ///
    /// Mode, size and identifier stay readable so the caller can send them
    /// alongside the handle.
    pub fn pass_platform_handle(&mut self) -> PlatformHandle {
        tracing::debug!(guid = %self.guid, "Passing platform handle");
        std::mem::take(&mut self.handle)
    }

    /// Second region over the same resource with its own handle reference.
    ///
    /// Returns an invalid region if this one is invalid or the OS refuses to
    /// duplicate. Aborts the process if this region is writable.
    pub fn duplicate(&self) -> Self {
        if !self.is_valid() {
            return Self::default();
        }

        if !self.mode.can_duplicate() {
            PreconditionViolation::DuplicateWritable.abort();
        }

        match self.handle.duplicate() {
            Ok(handle) => {
                tracing::debug!(guid = %self.guid, mode = %self.mode, "Duplicated region");
                Self {
                    handle,
                    mode: self.mode,
                    size: self.size,
                    guid: self.guid,
                }
            }
            Err(e) => {
                tracing::warn!(guid = %self.guid, error = %e, "Failed to duplicate region");
                Self::default()
            }
        }
    }

    /// One-shot Writable → ReadOnly conversion.
    ///
    /// Returns false on an invalid region. Aborts if the region is valid but
    /// not writable.
    pub fn convert_to_read_only(&mut self) -> bool {
        self.convert(Mode::ReadOnly)
    }

    /// One-shot Writable → Unsafe conversion.
    ///
    /// Returns false on an invalid region. Aborts if the region is valid but
    /// not writable.
    pub fn convert_to_unsafe(&mut self) -> bool {
        self.convert(Mode::Unsafe)
    }

    fn convert(&mut self, target: Mode) -> bool {
        if !self.is_valid() {
            return false;
        }

        let target = self
            .mode
            .transition_to(target)
            .unwrap_or_else(|violation| violation.abort());

        if let Err(e) = self.handle.restrict(target) {
            tracing::error!(guid = %self.guid, to = %target, error = %e, "Mode conversion failed");
            return false;
        }

        tracing::debug!(guid = %self.guid, from = %self.mode, to = %target, "Converted region");
        self.mode = target;
        true
    }

    /// Validate `[offset, offset + size)` and package it for the mapping
    /// primitive.
    pub fn mapping_request(
        &self,
        offset: usize,
        size: usize,
    ) -> Result<MappingRequest<'_>, SharedMemoryError> {
        let fd = self.handle.fd().ok_or(SharedMemoryError::InvalidRegion)?;
        RegionValidator::validate_mapping_request(self.size, offset, size)?;
        Ok(MappingRequest::new(fd, self.mode, offset, size, self.guid))
    }

    /// Map the whole region.
    pub fn map(&self) -> Result<SharedMemoryMapping, SharedMemoryError> {
        self.map_at(0, self.size)
    }

    /// Map `size` bytes starting at `offset`.
    pub fn map_at(
        &self,
        offset: usize,
        size: usize,
    ) -> Result<SharedMemoryMapping, SharedMemoryError> {
        SharedMemoryMapping::map(self.mapping_request(offset, size)?)
    }
}
