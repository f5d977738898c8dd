// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cross-process region transfer over Unix sockets.
//!
//! One message carries one region: its descriptors in a single
//! `SCM_RIGHTS` control message and its metadata in the payload frame:
//!
//! ```text
//! [u32 LE body length][u32 LE crc32 of body][JSON RegionMetadata]
//! ```
//!
//! Use a datagram or seqpacket socket so a frame is never split. The
//! receiver rebuilds the region through `take` and, unless configured
//! otherwise, verifies the handle against the claimed mode.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr};
use serde::{Deserialize, Serialize};

use crate::config::ShmemConfig;
use crate::error::TransferError;
use crate::mode::Mode;
use crate::platform::PlatformHandle;
use crate::shm::{check_permissions_correspond_to_mode, SharedMemoryRegion};
use crate::types::RegionId;

/// Frame header: body length + checksum.
const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on a received frame.
const MAX_FRAME_SIZE: usize = 4096;

/// A handle never has more than two descriptors.
const MAX_DESCRIPTORS: usize = 2;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: MsgFlags = MsgFlags::MSG_CMSG_CLOEXEC;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: MsgFlags = MsgFlags::empty();

/// Out-of-band metadata sent alongside the descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMetadata {
    pub mode: Mode,
    pub size: u64,
    pub guid: RegionId,
    pub fd_count: u8,
}

/// Send a region, consuming it. The local descriptors are closed once the
/// kernel has queued its copies for the peer.
pub fn send_region<S: AsFd>(
    socket: &S,
    mut region: SharedMemoryRegion,
) -> Result<(), TransferError> {
    let (mode, size, guid) = (region.mode(), region.size(), region.guid());
    send_handle(socket, region.pass_platform_handle(), mode, size, guid)
}

/// Send a bare handle with caller-supplied metadata.
///
/// The metadata is not checked against the handle: that is the receiver's
/// job.
pub fn send_handle<S: AsFd>(
    socket: &S,
    handle: PlatformHandle,
    mode: Mode,
    size: usize,
    guid: RegionId,
) -> Result<(), TransferError> {
    if !handle.is_valid() {
        return Err(TransferError::InvalidRegion);
    }

    let metadata = RegionMetadata {
        mode,
        size: size as u64,
        guid,
        fd_count: handle.descriptor_count() as u8,
    };
    let frame = encode_frame(&metadata)?;

    let (fd, readonly_fd) = handle.into_fds();
    let fds: Vec<RawFd> = fd
        .iter()
        .chain(readonly_fd.iter())
        .map(|fd| fd.as_raw_fd())
        .collect();

    let iov = [IoSlice::new(&frame)];
    let cmsgs = [ControlMessage::ScmRights(&fds)];

    sendmsg::<UnixAddr>(
        socket.as_fd().as_raw_fd(),
        &iov,
        &cmsgs,
        MsgFlags::empty(),
        None,
    )
    .map_err(|source| TransferError::Socket {
        operation: "sendmsg",
        source,
    })?;

    tracing::debug!(guid = %guid, mode = %mode, size = size, fds = fds.len(), "Sent region");
    Ok(())
}

/// Receive one region.
///
/// Fails if the frame is malformed, the descriptor count disagrees with the
/// metadata, `take` rejects the metadata, or (with
/// `verify_received_handles`) the descriptors' permissions do not match the
/// claimed mode. Every received descriptor is closed on failure.
pub fn receive_region<S: AsFd>(
    socket: &S,
    config: &ShmemConfig,
) -> Result<SharedMemoryRegion, TransferError> {
    let (frame, fds) = receive_message(socket)?;
    let metadata = decode_frame(&frame)?;

    if fds.len() != usize::from(metadata.fd_count) {
        tracing::warn!(
            guid = %metadata.guid,
            expected = metadata.fd_count,
            actual = fds.len(),
            "Descriptor count mismatch"
        );
        return Err(TransferError::DescriptorCount {
            expected: usize::from(metadata.fd_count),
            actual: fds.len(),
        });
    }

    let mut fds = fds.into_iter();
    let Some(fd) = fds.next() else {
        return Err(TransferError::DescriptorCount {
            expected: 1,
            actual: 0,
        });
    };
    let handle = PlatformHandle::new(fd, fds.next());

    // Out-of-range sizes are left for take to reject.
    let size = usize::try_from(metadata.size).unwrap_or(usize::MAX);
    let region = SharedMemoryRegion::take(handle, metadata.mode, size, metadata.guid);
    if !region.is_valid() {
        tracing::warn!(
            guid = %metadata.guid,
            size = metadata.size,
            "Rejected received region"
        );
        return Err(TransferError::InvalidRegion);
    }

    if config.verify_received_handles
        && !check_permissions_correspond_to_mode(
            region.platform_handle(),
            region.mode(),
            region.size(),
        )
    {
        tracing::warn!(
            guid = %region.guid(),
            claimed = %region.mode(),
            "Received handle failed verification"
        );
        return Err(TransferError::PermissionMismatch {
            mode: region.mode(),
        });
    }

    tracing::debug!(
        guid = %region.guid(),
        mode = %region.mode(),
        size = region.size(),
        "Received region"
    );
    Ok(region)
}

fn receive_message<S: AsFd>(socket: &S) -> Result<(Vec<u8>, Vec<OwnedFd>), TransferError> {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS]);
    let socket_error = |source| TransferError::Socket {
        operation: "recvmsg",
        source,
    };

    let mut iov = [IoSliceMut::new(&mut buf)];
    let msg = recvmsg::<UnixAddr>(
        socket.as_fd().as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buffer),
        RECV_FLAGS,
    )
    .map_err(socket_error)?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs().map_err(socket_error)? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            // SAFETY: the kernel just installed these descriptors for us and
            // nothing else owns them
            fds.extend(
                received
                    .into_iter()
                    .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
            );
        }
    }
    let len = msg.bytes;

    buf.truncate(len);
    Ok((buf, fds))
}

fn encode_frame(metadata: &RegionMetadata) -> Result<Vec<u8>, TransferError> {
    let body = serde_json::to_vec(metadata)?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_frame(frame: &[u8]) -> Result<RegionMetadata, TransferError> {
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(TransferError::FrameTooShort { len: frame.len() });
    }

    let body_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let expected = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

    let body = frame
        .get(FRAME_HEADER_SIZE..FRAME_HEADER_SIZE.saturating_add(body_len))
        .ok_or(TransferError::FrameTooShort { len: frame.len() })?;

    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(TransferError::ChecksumMismatch { expected, actual });
    }

    Ok(serde_json::from_slice(body)?)
}
