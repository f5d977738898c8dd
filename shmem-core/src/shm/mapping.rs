// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Mapping requests and the mmap-backed mapping primitive.
//!
//! A [`MappingRequest`] can only be built by a region after its offset and
//! size passed validation. [`SharedMemoryMapping`] turns one into memory and
//! unmaps it on drop.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::NonNull;

use crate::error::SharedMemoryError;
use crate::mode::Mode;
use crate::platform;
use crate::sys;
use crate::types::RegionId;

/// Validated (handle, mode, offset, size) tuple.
#[derive(Debug, Clone, Copy)]
pub struct MappingRequest<'a> {
    fd: BorrowedFd<'a>,
    mode: Mode,
    offset: usize,
    size: usize,
    guid: RegionId,
}

impl<'a> MappingRequest<'a> {
    pub(crate) fn new(
        fd: BorrowedFd<'a>,
        mode: Mode,
        offset: usize,
        size: usize,
        guid: RegionId,
    ) -> Self {
        Self {
            fd,
            mode,
            offset,
            size,
            guid,
        }
    }

    pub fn fd(&self) -> BorrowedFd<'a> {
        self.fd
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn guid(&self) -> RegionId {
        self.guid
    }
}

/// A mapped view of (part of) a shared memory region.
///
/// Owns the mapping and unmaps it on drop. Gives no protection against
/// concurrent access from other mappings of the same region.
pub struct SharedMemoryMapping {
    /// Start of the OS mapping, aligned to the allocation granularity.
    base: NonNull<u8>,
    /// Length passed to mmap.
    mapped_size: usize,
    /// Distance from `base` to the first requested byte.
    adjust: usize,
    size: usize,
    mode: Mode,
    guid: RegionId,
}

// SAFETY: SharedMemoryMapping owns its mapping; the pointer is not tied to a thread.
unsafe impl Send for SharedMemoryMapping {}

// SAFETY: shared access only hands out raw pointers or unsafe slices whose
// synchronization is the caller's responsibility.
unsafe impl Sync for SharedMemoryMapping {}

impl SharedMemoryMapping {
    /// Map a validated request.
    ///
    /// Read-only regions are mapped `PROT_READ` from a read-only descriptor,
    /// so the kernel also refuses any later `mprotect` to writable. A
    /// read-only request backed by a read-write descriptor is refused.
    pub fn map(request: MappingRequest<'_>) -> Result<Self, SharedMemoryError> {
        if request.mode == Mode::ReadOnly {
            let read_only = platform::is_read_only_descriptor(request.fd).map_err(|source| {
                SharedMemoryError::Syscall {
                    syscall: "fcntl",
                    source,
                }
            })?;
            if !read_only {
                return Err(SharedMemoryError::HandleShapeMismatch {
                    mode: Mode::ReadOnly,
                });
            }
        }

        let granularity = sys::vm_allocation_granularity();
        let adjust = request.offset % granularity;
        let aligned_offset = request.offset - adjust;

        let overflow = || SharedMemoryError::MappingOverflow {
            offset: request.offset,
            size: request.size,
        };
        let mapped_size = request.size.checked_add(adjust).ok_or_else(overflow)?;
        let file_offset = libc::off_t::try_from(aligned_offset).map_err(|_| overflow())?;

        let prot = match request.mode {
            Mode::ReadOnly => libc::PROT_READ,
            Mode::Writable | Mode::Unsafe => libc::PROT_READ | libc::PROT_WRITE,
        };

        // SAFETY: fd is borrowed from a live region, offset is aligned and
        // the range was validated against the region size
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_size,
                prot,
                libc::MAP_SHARED,
                request.fd.as_raw_fd(),
                file_offset,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", io::Error::last_os_error()),
            });
        }

        let base = NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })?;

        tracing::debug!(
            guid = %request.guid,
            mode = %request.mode,
            offset = request.offset,
            size = request.size,
            "Mapped shared memory region"
        );

        Ok(Self {
            base,
            mapped_size,
            adjust,
            size: request.size,
            mode: request.mode,
            guid: request.guid,
        })
    }

    /// Pointer to the first requested byte.
    pub fn memory(&self) -> *mut u8 {
        // SAFETY: adjust < granularity <= mapped_size, so the result stays in the mapping
        unsafe { self.base.as_ptr().add(self.adjust) }
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn guid(&self) -> RegionId {
        self.guid
    }

    pub fn is_writable(&self) -> bool {
        self.mode != Mode::ReadOnly
    }

    /// Get a slice view of the mapped bytes.
    ///
    /// # Safety
    /// Caller must ensure no concurrent writes to the mapped bytes, from this
    /// or any other process.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.memory(), self.size)
    }

    /// Get a mutable slice view of the mapped bytes.
    ///
    /// Fails on read-only mappings.
    ///
    /// # Safety
    /// Caller must ensure exclusive access to the mapped bytes across every
    /// mapping of the region.
    pub unsafe fn as_mut_slice(&mut self) -> Result<&mut [u8], SharedMemoryError> {
        if !self.is_writable() {
            return Err(SharedMemoryError::ReadOnlyMapping { guid: self.guid });
        }
        Ok(std::slice::from_raw_parts_mut(self.memory(), self.size))
    }
}

impl std::fmt::Debug for SharedMemoryMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemoryMapping")
            .field("memory", &self.memory())
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("guid", &self.guid)
            .finish()
    }
}

impl Drop for SharedMemoryMapping {
    fn drop(&mut self) {
        // SAFETY: base and mapped_size describe the mapping created in map()
        let result =
            unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.mapped_size) };
        if result < 0 {
            tracing::error!(
                guid = %self.guid,
                error = %io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }
    }
}
