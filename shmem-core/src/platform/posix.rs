// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! POSIX descriptor-pair backend.
//!
//! A writable region holds two descriptors to the same object: the
//! read-write `fd` and a `readonly_fd` kept only so the region can later be
//! converted to read-only. Conversions drop whichever descriptor the new
//! mode no longer needs.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode as FileMode;

use super::HandleOps;
use crate::config::{Backend, ShmemConfig};
use crate::error::SharedMemoryError;
use crate::mode::Mode;
use crate::types::RegionId;

/// Hex characters of a fresh identifier used in shm_open names. Keeps the
/// default name within the 31-byte limit some kernels impose.
const SHM_NAME_RANDOM_LEN: usize = 16;

/// Owned POSIX handle of a region: one or two descriptors.
///
/// A default-constructed pair owns nothing and is invalid.
#[derive(Debug, Default)]
pub struct FdPair {
    fd: Option<OwnedFd>,
    readonly_fd: Option<OwnedFd>,
}

impl FdPair {
    /// Assemble a handle from descriptors received out of band.
    pub fn new(fd: OwnedFd, readonly_fd: Option<OwnedFd>) -> Self {
        Self {
            fd: Some(fd),
            readonly_fd,
        }
    }

    /// Whether the pair owns a primary descriptor.
    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Primary descriptor. Read-write unless the region is read-only.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Auxiliary read-only descriptor; present only for writable regions.
    pub fn readonly_fd(&self) -> Option<BorrowedFd<'_>> {
        self.readonly_fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Raw descriptor numbers, `-1` where a descriptor is absent.
    pub fn raw_fds(&self) -> (RawFd, RawFd) {
        let raw = |fd: &Option<OwnedFd>| fd.as_ref().map_or(-1, |fd| fd.as_raw_fd());
        (raw(&self.fd), raw(&self.readonly_fd))
    }

    /// Number of descriptors currently owned.
    pub fn descriptor_count(&self) -> usize {
        usize::from(self.fd.is_some()) + usize::from(self.readonly_fd.is_some())
    }

    /// Give up ownership of the descriptors.
    pub fn into_fds(self) -> (Option<OwnedFd>, Option<OwnedFd>) {
        (self.fd, self.readonly_fd)
    }
}

impl HandleOps for FdPair {
    fn acquire(config: &ShmemConfig, mode: Mode, size: usize) -> Result<Self, SharedMemoryError> {
        let need_readonly = mode != Mode::Unsafe;
        let (fd, readonly_fd) = match config.backend {
            Backend::Memfd => create_memfd(&config.name_prefix, need_readonly)?,
            Backend::ShmOpen => create_shm_object(&config.name_prefix, need_readonly)?,
        };

        set_len(&fd, size)?;

        let mut pair = Self {
            fd: Some(fd),
            readonly_fd,
        };
        if mode == Mode::ReadOnly {
            pair.restrict(Mode::ReadOnly)?;
        }
        Ok(pair)
    }

    fn duplicate(&self) -> Result<Self, SharedMemoryError> {
        let dup = |fd: &Option<OwnedFd>| {
            fd.as_ref()
                .map(OwnedFd::try_clone)
                .transpose()
                .map_err(|source| SharedMemoryError::DuplicateFailed { source })
        };

        Ok(Self {
            fd: dup(&self.fd)?,
            readonly_fd: dup(&self.readonly_fd)?,
        })
    }

    fn restrict(&mut self, target: Mode) -> Result<(), SharedMemoryError> {
        match target {
            Mode::ReadOnly => {
                let shape_mismatch = SharedMemoryError::HandleShapeMismatch {
                    mode: Mode::Writable,
                };
                let (Some(fd), Some(readonly_fd)) = (&self.fd, &self.readonly_fd) else {
                    return Err(shape_mismatch);
                };

                let inspect_error = |source| SharedMemoryError::Syscall {
                    syscall: "fstat",
                    source,
                };
                let primary = inspect(fd.as_fd()).map_err(inspect_error)?;
                let readonly = inspect(readonly_fd.as_fd()).map_err(inspect_error)?;
                if readonly.access != Access::ReadOnly || !readonly.same_object(&primary) {
                    return Err(shape_mismatch);
                }

                seal_future_writes(fd)?;

                // Replacing the read-write descriptor closes it.
                self.fd = self.readonly_fd.take();
            }
            Mode::Unsafe => {
                self.readonly_fd = None;
            }
            Mode::Writable => {}
        }
        Ok(())
    }

    fn has_shape_of(&self, mode: Mode) -> bool {
        match mode {
            Mode::Writable => self.fd.is_some() && self.readonly_fd.is_some(),
            Mode::ReadOnly | Mode::Unsafe => self.fd.is_some() && self.readonly_fd.is_none(),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn create_memfd(
    prefix: &str,
    need_readonly: bool,
) -> Result<(OwnedFd, Option<OwnedFd>), SharedMemoryError> {
    use std::ffi::CString;

    use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

    let name = CString::new(prefix).map_err(|e| SharedMemoryError::CreateFailed {
        reason: format!("Invalid name: {}", e),
    })?;

    let fd = memfd_create(
        name.as_c_str(),
        MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
    )
    .map_err(|e| syscall_error("memfd_create", e))?;

    let readonly_fd = if need_readonly {
        Some(reopen_read_only(&fd)?)
    } else {
        None
    };

    Ok((fd, readonly_fd))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn create_memfd(
    _prefix: &str,
    _need_readonly: bool,
) -> Result<(OwnedFd, Option<OwnedFd>), SharedMemoryError> {
    Err(SharedMemoryError::CreateFailed {
        reason: "memfd backend is not available on this target".to_string(),
    })
}

/// A memfd has no name to open twice; procfs gives a fresh open file
/// description with its own access mode.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn reopen_read_only(fd: &OwnedFd) -> Result<OwnedFd, SharedMemoryError> {
    let path = format!("/proc/self/fd/{}", fd.as_raw_fd());
    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(&path)
        .map_err(|source| SharedMemoryError::Syscall {
            syscall: "open",
            source,
        })?;
    Ok(OwnedFd::from(file))
}

fn create_shm_object(
    prefix: &str,
    need_readonly: bool,
) -> Result<(OwnedFd, Option<OwnedFd>), SharedMemoryError> {
    let id = RegionId::generate().simple();
    let name = format!("/{}-{}", prefix, &id[..SHM_NAME_RANDOM_LEN]);

    let fd = shm_open(
        name.as_str(),
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
        FileMode::S_IRUSR | FileMode::S_IWUSR,
    )
    .map_err(|e| syscall_error("shm_open", e))?;

    let readonly_fd = if need_readonly {
        shm_open(name.as_str(), OFlag::O_RDONLY, FileMode::empty())
            .map(Some)
            .map_err(|e| syscall_error("shm_open", e))
    } else {
        Ok(None)
    };

    // The object lives on through the open descriptors only.
    if let Err(e) = shm_unlink(name.as_str()) {
        tracing::warn!(name = %name, error = %e, "Failed to unlink shared memory object");
    }

    Ok((fd, readonly_fd?))
}

/// Forbid new writable mappings and writes through any descriptor, and fix
/// the size. Existing writable mappings keep working.
///
/// Objects that do not accept seals (shm_open, or a memfd created without
/// `MFD_ALLOW_SEALING`) are left alone: for those, a same-uid process can
/// still reopen `/proc/self/fd/<n>` read-write.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn seal_future_writes(fd: &OwnedFd) -> Result<(), SharedMemoryError> {
    let raw = fd.as_raw_fd();

    // SAFETY: raw is an open descriptor owned by the caller
    let seals = unsafe { libc::fcntl(raw, libc::F_GET_SEALS) };
    if seals < 0 || seals & libc::F_SEAL_SEAL != 0 {
        tracing::debug!(fd = raw, "Shared memory object does not accept seals");
        return Ok(());
    }

    let add = libc::F_SEAL_FUTURE_WRITE | libc::F_SEAL_SHRINK | libc::F_SEAL_GROW;
    // SAFETY: as above; F_ADD_SEALS takes an int argument
    if unsafe { libc::fcntl(raw, libc::F_ADD_SEALS, add) } < 0 {
        return Err(SharedMemoryError::Syscall {
            syscall: "fcntl",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn seal_future_writes(_fd: &OwnedFd) -> Result<(), SharedMemoryError> {
    Ok(())
}

/// Whether an object that supports sealing can still gain new writers.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn reopenable_for_write(fd: BorrowedFd<'_>) -> bool {
    // SAFETY: fd is borrowed for the duration of the call
    let seals = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GET_SEALS) };
    if seals < 0 || seals & libc::F_SEAL_SEAL != 0 {
        return false;
    }
    seals & (libc::F_SEAL_FUTURE_WRITE | libc::F_SEAL_WRITE) == 0
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn reopenable_for_write(_fd: BorrowedFd<'_>) -> bool {
    false
}

fn set_len(fd: &OwnedFd, size: usize) -> Result<(), SharedMemoryError> {
    // SAFETY: fd is an open descriptor; size was validated to fit in i32
    let result = unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) };
    if result < 0 {
        return Err(SharedMemoryError::Syscall {
            syscall: "ftruncate",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

fn syscall_error(syscall: &'static str, errno: nix::Error) -> SharedMemoryError {
    SharedMemoryError::Syscall {
        syscall,
        source: io::Error::from(errno),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    ReadWrite,
    Other,
}

#[derive(Debug, Clone, Copy)]
struct DescriptorInfo {
    access: Access,
    size: u64,
    dev: u64,
    ino: u64,
}

impl DescriptorInfo {
    fn same_object(&self, other: &DescriptorInfo) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

fn inspect(fd: BorrowedFd<'_>) -> io::Result<DescriptorInfo> {
    let raw = fd.as_raw_fd();

    // SAFETY: raw is a valid descriptor borrowed for the duration of the call
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let access = match flags & libc::O_ACCMODE {
        libc::O_RDONLY => Access::ReadOnly,
        libc::O_RDWR => Access::ReadWrite,
        _ => Access::Other,
    };

    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: stat points to writable memory large enough for libc::stat
    if unsafe { libc::fstat(raw, stat.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstat succeeded and initialized the buffer
    let stat = unsafe { stat.assume_init() };

    Ok(DescriptorInfo {
        access,
        size: stat.st_size as u64,
        dev: stat.st_dev as u64,
        ino: stat.st_ino as u64,
    })
}

/// Whether `fd` was opened read-only.
pub(crate) fn is_read_only_descriptor(fd: BorrowedFd<'_>) -> io::Result<bool> {
    Ok(inspect(fd)?.access == Access::ReadOnly)
}

/// Derive the mode a handle is actually shaped for, from the kernel's view
/// of its descriptors. `None` if it matches no mode.
fn actual_shape(handle: &FdPair) -> io::Result<Option<(Mode, u64)>> {
    let Some(fd) = handle.fd() else {
        return Ok(None);
    };
    let info = inspect(fd)?;

    let mode = match (info.access, handle.readonly_fd()) {
        (Access::ReadWrite, Some(readonly_fd)) => {
            let readonly = inspect(readonly_fd)?;
            (readonly.access == Access::ReadOnly && readonly.same_object(&info))
                .then_some(Mode::Writable)
        }
        (Access::ReadWrite, None) => Some(Mode::Unsafe),
        (Access::ReadOnly, None) => (!reopenable_for_write(fd)).then_some(Mode::ReadOnly),
        _ => None,
    };

    Ok(mode.map(|mode| (mode, info.size)))
}

pub(crate) fn check_permissions(handle: &FdPair, mode: Mode, size: usize) -> bool {
    let (fd, readonly_fd) = handle.raw_fds();
    match actual_shape(handle) {
        Ok(Some((actual, object_size))) if actual == mode => {
            if object_size < size as u64 {
                tracing::warn!(
                    fd,
                    object_size,
                    claimed_size = size,
                    "Shared memory object is smaller than claimed size"
                );
                return false;
            }
            true
        }
        Ok(Some((actual, _))) => {
            tracing::warn!(
                fd,
                readonly_fd,
                claimed = %mode,
                actual = %actual,
                "Handle permissions do not correspond to claimed mode"
            );
            false
        }
        Ok(None) => {
            tracing::warn!(
                fd,
                readonly_fd,
                claimed = %mode,
                "Handle matches no known mode shape"
            );
            false
        }
        Err(e) => {
            tracing::warn!(fd, readonly_fd, error = %e, "Failed to inspect handle descriptors");
            false
        }
    }
}
