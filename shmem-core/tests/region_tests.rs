// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Region lifecycle tests: creation, conversion, transfer of ownership,
//! mapping limits, and handle verification.

mod common;

use shmem_core::shm::MAX_REGION_SIZE;
use shmem_core::sys::vm_allocation_granularity;
use shmem_core::{
    check_permissions_correspond_to_mode, Backend, ConfigLoader, Mode, PlatformHandle,
    RegionId, SharedMemoryError, SharedMemoryRegion, ShmemConfig,
};
use tempfile::TempDir;

const REGION_SIZE: usize = 1024;

fn check(region: &SharedMemoryRegion, mode: Mode) -> bool {
    check_permissions_correspond_to_mode(region.platform_handle(), mode, region.size())
}

fn backends() -> Vec<ShmemConfig> {
    [Backend::Memfd, Backend::ShmOpen]
        .into_iter()
        .filter(Backend::is_supported)
        .map(|backend| ShmemConfig {
            backend,
            ..ShmemConfig::default()
        })
        .collect()
}

#[test]
fn default_constructed_region_is_invalid() {
    common::init_tracing();
    let mut region = SharedMemoryRegion::default();
    assert!(!region.is_valid());
    assert!(region.map().is_err());
    let duplicate = region.duplicate();
    assert!(!duplicate.is_valid());
    assert!(!region.convert_to_read_only());
}

#[test]
fn create_region_of_zero_size_is_invalid() {
    assert!(!SharedMemoryRegion::create_writable(0).is_valid());
    assert!(!SharedMemoryRegion::create_unsafe(0).is_valid());
}

#[test]
fn create_too_large_region_is_invalid() {
    let too_large = MAX_REGION_SIZE + 1;
    assert!(!SharedMemoryRegion::create_writable(too_large).is_valid());
    assert!(!SharedMemoryRegion::create_unsafe(too_large).is_valid());
}

#[test]
fn reported_size_is_requested_size() {
    for size in [1, 2, 3, 64, 4096, 1024 * 1024] {
        let mut region = SharedMemoryRegion::create_writable(size);
        assert_eq!(region.size(), size);

        assert!(region.convert_to_read_only());
        assert_eq!(region.size(), size);
    }
}

#[test]
fn convert_writable_to_read_only() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    assert_eq!(region.mode(), Mode::Writable);
    assert!(region.convert_to_read_only());
    assert_eq!(region.mode(), Mode::ReadOnly);
}

#[test]
fn convert_writable_to_unsafe() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    assert_eq!(region.mode(), Mode::Writable);
    assert!(region.convert_to_unsafe());
    assert_eq!(region.mode(), Mode::Unsafe);
}

#[test]
fn read_only_handle_is_not_writable() {
    for config in backends() {
        let mut region =
            SharedMemoryRegion::create_with_config(&config, Mode::Writable, REGION_SIZE);
        assert!(region.is_valid());
        assert!(!common::handle_refuses_writable_mapping(&region));

        assert!(region.convert_to_read_only());
        assert_eq!(region.mode(), Mode::ReadOnly);
        assert!(common::handle_refuses_writable_mapping(&region));
    }
}

#[test]
fn read_only_mapping_cannot_be_upgraded() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.convert_to_read_only());

    let mut mapping = region.map().unwrap();
    assert!(!mapping.is_writable());
    // SAFETY: single-threaded test
    assert!(matches!(
        unsafe { mapping.as_mut_slice() },
        Err(SharedMemoryError::ReadOnlyMapping { .. })
    ));

    // SAFETY: mapping.memory() is page-aligned for offset 0 and covers size bytes
    let rc = unsafe {
        libc::mprotect(
            mapping.memory() as *mut libc::c_void,
            mapping.size(),
            libc::PROT_READ | libc::PROT_WRITE,
        )
    };
    assert_ne!(rc, 0, "read-only mapping was re-protected as writable");
}

#[test]
fn invalid_after_pass() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    let _handle = region.pass_platform_handle();
    assert!(!region.is_valid());
}

#[test]
fn invalid_after_move() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    let guid = region.guid();

    let mut moved_region = std::mem::take(&mut region);
    assert!(!region.is_valid());
    assert!(moved_region.is_valid());
    assert_eq!(moved_region.guid(), guid);
    assert_eq!(moved_region.size(), REGION_SIZE);
    assert!(moved_region.convert_to_read_only());
}

#[test]
fn take_region_of_zero_size_is_invalid() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    let handle = region.pass_platform_handle();
    let region2 = SharedMemoryRegion::take(handle, region.mode(), 0, region.guid());
    assert!(!region2.is_valid());
}

#[test]
fn take_too_large_region_is_invalid() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    let handle = region.pass_platform_handle();
    let region2 =
        SharedMemoryRegion::take(handle, region.mode(), MAX_REGION_SIZE + 1, region.guid());
    assert!(!region2.is_valid());
}

#[test]
fn map_at_out_of_the_region_limits() {
    let region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.is_valid());
    assert!(matches!(
        region.map_at(0, region.size() + 1),
        Err(SharedMemoryError::MappingOutOfBounds { .. })
    ));
}

#[test]
fn map_at_with_overflow() {
    let granularity = vm_allocation_granularity();
    let region = SharedMemoryRegion::create_writable(granularity * 2);
    assert!(region.is_valid());

    let size = usize::MAX;
    let offset = granularity;
    // size + offset wraps below the region size, but must still be rejected.
    assert!(size.wrapping_add(offset) < region.size());
    assert!(matches!(
        region.map_at(offset, size),
        Err(SharedMemoryError::MappingOverflow { .. })
    ));
}

#[test]
fn convert_to_read_only_invalidates_second_handle() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.platform_handle().raw_fds().1 >= 0);
    assert!(region.convert_to_read_only());
    assert!(region.platform_handle().raw_fds().1 < 0);
}

#[test]
fn convert_to_unsafe_invalidates_second_handle() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.convert_to_unsafe());
    assert!(region.platform_handle().raw_fds().1 < 0);
}

#[test]
fn platform_handle_permissions_correspond_to_mode() {
    for config in backends() {
        // Writable region.
        let mut region =
            SharedMemoryRegion::create_with_config(&config, Mode::Writable, REGION_SIZE);
        assert!(region.is_valid());
        assert!(check(&region, Mode::Writable));
        assert!(!check(&region, Mode::ReadOnly));
        assert!(!check(&region, Mode::Unsafe));

        // Read-only region.
        assert!(region.convert_to_read_only());
        assert!(check(&region, Mode::ReadOnly));
        assert!(!check(&region, Mode::Writable));
        assert!(!check(&region, Mode::Unsafe));

        // Unsafe region.
        let region2 = SharedMemoryRegion::create_with_config(&config, Mode::Unsafe, REGION_SIZE);
        assert!(region2.is_valid());
        assert!(check(&region2, Mode::Unsafe));
        assert!(!check(&region2, Mode::ReadOnly));
        assert!(!check(&region2, Mode::Writable));
    }
}

#[test]
fn duplicate_shares_resource_and_identifier() {
    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    let mut writer = region.map().unwrap();
    // SAFETY: single-threaded test
    unsafe {
        writer.as_mut_slice().unwrap()[..4].copy_from_slice(b"ping");
    }

    assert!(region.convert_to_read_only());
    let duplicate = region.duplicate();
    assert!(duplicate.is_valid());
    assert_eq!(duplicate.guid(), region.guid());
    assert_eq!(duplicate.mode(), Mode::ReadOnly);
    assert_ne!(
        duplicate.platform_handle().raw_fds().0,
        region.platform_handle().raw_fds().0
    );

    // The duplicate outlives the original.
    drop(region);
    let reader = duplicate.map().unwrap();
    // SAFETY: single-threaded test
    unsafe {
        assert_eq!(&reader.as_slice()[..4], b"ping");
    }
}

#[test]
fn duplicate_unsafe_region_is_writable() {
    let region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let duplicate = region.duplicate();
    assert!(check(&duplicate, Mode::Unsafe));

    let mut mapping = duplicate.map().unwrap();
    // SAFETY: single-threaded test
    unsafe {
        mapping.as_mut_slice().unwrap()[0] = 7;
        assert_eq!(region.map().unwrap().as_slice()[0], 7);
    }
}

#[test]
fn region_from_config_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("shmem.yaml");
    std::fs::write(
        &config_path,
        r#"
backend: shm_open
name_prefix: shmem-test
verify_received_handles: true
"#,
    )
    .expect("Failed to write config");

    let config = ConfigLoader::load_file(&config_path).expect("Failed to load config");
    assert_eq!(config.backend, Backend::ShmOpen);

    let mut region = SharedMemoryRegion::create_with_config(&config, Mode::Writable, REGION_SIZE);
    assert!(region.is_valid());
    assert!(check(&region, Mode::Writable));
    assert!(region.convert_to_unsafe());
    assert!(check(&region, Mode::Unsafe));
}

/// Writable-shaped pair whose "read-only" descriptor is read-write.
fn read_write_pair(config: &ShmemConfig) -> (PlatformHandle, RegionId) {
    let mut region = SharedMemoryRegion::create_with_config(config, Mode::Unsafe, REGION_SIZE);
    let guid = region.guid();
    let (fd, _) = region.pass_platform_handle().into_fds();
    let fd = fd.expect("Unsafe region has a descriptor");
    let second = fd.try_clone().expect("Failed to duplicate descriptor");
    (PlatformHandle::new(fd, Some(second)), guid)
}

#[test]
fn convert_taken_region_with_writable_second_descriptor_fails() {
    for config in backends() {
        let (handle, guid) = read_write_pair(&config);
        let mut region = SharedMemoryRegion::take(handle, Mode::Writable, REGION_SIZE, guid);
        // Descriptor count matches, so take accepts it.
        assert!(region.is_valid());
        assert!(!check(&region, Mode::Writable));

        assert!(!region.convert_to_read_only());
        assert_eq!(region.mode(), Mode::Writable);
        assert_eq!(region.platform_handle().descriptor_count(), 2);
        assert!(!check(&region, Mode::ReadOnly));
    }
}

#[test]
fn map_taken_region_with_writable_descriptor_claimed_read_only_fails() {
    for config in backends() {
        let mut source = SharedMemoryRegion::create_with_config(&config, Mode::Unsafe, REGION_SIZE);
        let guid = source.guid();
        let handle = source.pass_platform_handle();

        let region = SharedMemoryRegion::take(handle, Mode::ReadOnly, REGION_SIZE, guid);
        assert!(region.is_valid());
        assert!(matches!(
            region.map(),
            Err(SharedMemoryError::HandleShapeMismatch {
                mode: Mode::ReadOnly
            })
        ));
    }
}

#[cfg(target_os = "linux")]
mod memfd_sealing {
    use std::fs::{File, OpenOptions};
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

    use super::*;

    fn memfd_config() -> ShmemConfig {
        ShmemConfig {
            backend: Backend::Memfd,
            ..ShmemConfig::default()
        }
    }

    fn proc_path(fd: BorrowedFd<'_>) -> String {
        format!("/proc/self/fd/{}", fd.as_raw_fd())
    }

    #[test]
    fn read_only_memfd_reopened_read_write_cannot_map_writable() {
        let mut region =
            SharedMemoryRegion::create_with_config(&memfd_config(), Mode::Writable, REGION_SIZE);
        let mut writer = region.map().unwrap();
        assert!(region.convert_to_read_only());

        let fd = region.platform_handle().fd().unwrap();
        let reopened: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(proc_path(fd))
            .expect("Failed to reopen through procfs")
            .into();
        assert!(common::fd_refuses_writable_mapping(reopened.as_fd(), REGION_SIZE));

        // Mappings made before the conversion keep working.
        // SAFETY: single-threaded test
        unsafe {
            writer.as_mut_slice().unwrap()[0] = 42;
            assert_eq!(region.map().unwrap().as_slice()[0], 42);
        }
    }

    #[test]
    fn read_only_descriptor_of_unsealed_memfd_fails_verification() {
        let mut source =
            SharedMemoryRegion::create_with_config(&memfd_config(), Mode::Unsafe, REGION_SIZE);
        let guid = source.guid();
        let (fd, _) = source.pass_platform_handle().into_fds();
        let fd = fd.unwrap();
        let readonly: OwnedFd = File::open(proc_path(fd.as_fd())).unwrap().into();
        drop(fd);

        // A read-only descriptor, but the object still accepts new writers.
        let handle = PlatformHandle::new(readonly, None);
        let region = SharedMemoryRegion::take(handle, Mode::ReadOnly, REGION_SIZE, guid);
        assert!(region.is_valid());
        assert!(!check(&region, Mode::ReadOnly));
    }
}
