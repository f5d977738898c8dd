// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Region transfer over Unix datagram sockets, including peers that lie
//! about the mode of the handle they send.

mod common;

use std::os::unix::net::UnixDatagram;

use shmem_core::transfer::{receive_region, send_handle, send_region};
use shmem_core::{Mode, SharedMemoryRegion, ShmemConfig, TransferError};

const REGION_SIZE: usize = 4096;

fn verifying() -> ShmemConfig {
    ShmemConfig::default()
}

fn trusting() -> ShmemConfig {
    ShmemConfig {
        verify_received_handles: false,
        ..ShmemConfig::default()
    }
}

#[test]
fn writable_region_round_trip() {
    common::init_tracing();
    let (sender, receiver) = UnixDatagram::pair().expect("Failed to create socket pair");

    let region = SharedMemoryRegion::create_writable(REGION_SIZE);
    let guid = region.guid();
    let mut mapping = region.map().unwrap();
    // SAFETY: single-threaded test
    unsafe {
        mapping.as_mut_slice().unwrap()[..5].copy_from_slice(b"shmem");
    }

    send_region(&sender, region).expect("Failed to send region");
    let mut received = receive_region(&receiver, &verifying()).expect("Failed to receive region");

    assert!(received.is_valid());
    assert_eq!(received.guid(), guid);
    assert_eq!(received.mode(), Mode::Writable);
    assert_eq!(received.size(), REGION_SIZE);

    // The receiver can still derive a read-only region.
    assert!(received.convert_to_read_only());
    let view = received.map().unwrap();
    // SAFETY: single-threaded test
    unsafe {
        assert_eq!(&view.as_slice()[..5], b"shmem");
    }
}

#[test]
fn read_only_region_round_trip() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    let mut region = SharedMemoryRegion::create_writable(REGION_SIZE);
    assert!(region.convert_to_read_only());
    let guid = region.guid();

    send_region(&sender, region).unwrap();
    let received = receive_region(&receiver, &verifying()).unwrap();
    assert_eq!(received.mode(), Mode::ReadOnly);
    assert_eq!(received.guid(), guid);
    assert!(common::handle_refuses_writable_mapping(&received));
}

#[test]
fn forged_read_only_claim_is_rejected() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    // A peer sends a read-write handle while claiming it is read-only.
    let mut region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let guid = region.guid();
    send_handle(&sender, region.pass_platform_handle(), Mode::ReadOnly, REGION_SIZE, guid).unwrap();

    let result = receive_region(&receiver, &verifying());
    assert!(matches!(
        result,
        Err(TransferError::PermissionMismatch {
            mode: Mode::ReadOnly
        })
    ));
}

#[test]
fn forged_claim_accepted_without_verification() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    let mut region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let guid = region.guid();
    send_handle(&sender, region.pass_platform_handle(), Mode::ReadOnly, REGION_SIZE, guid).unwrap();

    // Descriptor count alone cannot tell unsafe from read-only.
    let received = receive_region(&receiver, &trusting()).unwrap();
    assert_eq!(received.mode(), Mode::ReadOnly);
    assert!(!common::handle_refuses_writable_mapping(&received));
}

#[test]
fn forged_writable_claim_fails_take() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    let mut region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let guid = region.guid();
    send_handle(&sender, region.pass_platform_handle(), Mode::Writable, REGION_SIZE, guid).unwrap();

    let result = receive_region(&receiver, &trusting());
    assert!(matches!(result, Err(TransferError::InvalidRegion)));
}

#[test]
fn zero_size_claim_is_rejected() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    let mut region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let guid = region.guid();
    send_handle(&sender, region.pass_platform_handle(), Mode::Unsafe, 0, guid).unwrap();

    let result = receive_region(&receiver, &verifying());
    assert!(matches!(result, Err(TransferError::InvalidRegion)));
}

#[test]
fn oversized_claim_is_rejected() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    let mut region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let guid = region.guid();
    send_handle(
        &sender,
        region.pass_platform_handle(),
        Mode::Unsafe,
        REGION_SIZE * 16,
        guid,
    )
    .unwrap();

    // Within the size bound, so take accepts it; the object is too small.
    let result = receive_region(&receiver, &verifying());
    assert!(matches!(
        result,
        Err(TransferError::PermissionMismatch { mode: Mode::Unsafe })
    ));
}

#[test]
fn sending_consumes_region() {
    let (sender, receiver) = UnixDatagram::pair().unwrap();

    let region = SharedMemoryRegion::create_unsafe(REGION_SIZE);
    let duplicate = region.duplicate();
    send_region(&sender, region).unwrap();

    let received = receive_region(&receiver, &verifying()).unwrap();
    assert_eq!(received.guid(), duplicate.guid());
    assert_eq!(received.mode(), Mode::Unsafe);
}
