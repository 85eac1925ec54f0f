use crate::RingGeometry;
use std::io;
use std::mem;
use std::os::fd::RawFd;

/// Socket option level for netlink options.
pub const SOL_NETLINK: libc::c_int = 270;

/// Registers the receive ring (`struct nl_mmap_req` payload).
pub const NETLINK_RX_RING: libc::c_int = 6;

/// Registers the transmit ring (`struct nl_mmap_req` payload).
pub const NETLINK_TX_RING: libc::c_int = 7;

/// The descriptor-level operations a [`RingManager`](crate::RingManager)
/// needs from the socket it maps rings for.
pub trait Channel {
    /// Descriptor the ring is mapped from.
    fn raw_descriptor(&self) -> RawFd;

    /// Sets a `SOL_NETLINK` option.
    fn set_option(&self, option: libc::c_int, value: &[u8]) -> io::Result<()>;

    /// Closes the channel. Called after the ring mapping has been released.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Ring registration request (`struct nl_mmap_req`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MmapRequest {
    pub block_size: u32,
    pub block_nr: u32,
    pub frame_size: u32,
    pub frame_nr: u32,
}

impl MmapRequest {
    /// Size of the request on the wire.
    pub const LEN: usize = mem::size_of::<Self>();

    /// Encodes the request in native byte order, as `setsockopt` expects it.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip([
            self.block_size,
            self.block_nr,
            self.frame_size,
            self.frame_nr,
        ]) {
            chunk.copy_from_slice(&field.to_ne_bytes());
        }
        bytes
    }

    /// Decodes a request; `None` if `bytes` has the wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let field = |i: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            u32::from_ne_bytes(word)
        };
        Some(Self {
            block_size: field(0),
            block_nr: field(1),
            frame_size: field(2),
            frame_nr: field(3),
        })
    }
}

impl From<&RingGeometry> for MmapRequest {
    fn from(geometry: &RingGeometry) -> Self {
        Self {
            block_size: geometry.block_size(),
            block_nr: geometry.block_count(),
            frame_size: geometry.frame_size(),
            frame_nr: geometry.frame_count(),
        }
    }
}
