// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Size and mapping-range validation.
//!
//! Pure checks applied to every size and offset that reaches the OS,
//! including values received from another process.

use crate::error::SharedMemoryError;

/// Largest size a region may declare (signed 32-bit bound).
pub const MAX_REGION_SIZE: usize = i32::MAX as usize;

/// Largest end offset a single mapping may reach on this address width.
const MAX_MAPPING_END: usize = isize::MAX as usize;

/// Validator for region sizes and mapping requests.
pub struct RegionValidator;

impl RegionValidator {
    /// Validate a declared region size: `0 < size <= MAX_REGION_SIZE`.
    pub fn validate_size(size: usize) -> Result<(), SharedMemoryError> {
        if size == 0 {
            return Err(SharedMemoryError::ZeroSize);
        }

        if size > MAX_REGION_SIZE {
            return Err(SharedMemoryError::SizeTooLarge {
                size,
                max: MAX_REGION_SIZE,
            });
        }

        Ok(())
    }

    /// Validate `[offset, offset + size)` against a region of `region_size`.
    ///
    /// Returns the end offset. The sum is overflow-checked; a wrapped sum
    /// that happens to land inside the region is still rejected.
    pub fn validate_mapping_request(
        region_size: usize,
        offset: usize,
        size: usize,
    ) -> Result<usize, SharedMemoryError> {
        if size == 0 {
            return Err(SharedMemoryError::ZeroMappingSize);
        }

        let end = offset
            .checked_add(size)
            .filter(|end| *end <= MAX_MAPPING_END)
            .ok_or(SharedMemoryError::MappingOverflow { offset, size })?;

        if end > region_size {
            return Err(SharedMemoryError::MappingOutOfBounds {
                offset,
                size,
                region_size,
            });
        }

        Ok(end)
    }

    pub fn is_valid_mapping_request(region_size: usize, offset: usize, size: usize) -> bool {
        Self::validate_mapping_request(region_size, offset, size).is_ok()
    }
}
