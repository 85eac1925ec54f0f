//! nlring - Netlink Sockets with Memory-Mapped Frame Rings
//!
//! A netlink socket can share a receive ring and a transmit ring with the
//! kernel. Messages are then exchanged by writing frames in place and flipping
//! their status word, without a copy or a syscall per message.
//!
//! # Key Features
//!
//! - Two-phase bring-up: register geometry per direction, then map once
//! - One shared mapping, rx frames first, tx frames after
//! - Lock-free cursors, single owner per direction (enforced by `&mut`)
//! - Mapping released exactly once, by `unmap`, `close` or drop
//!
//! # Example
//!
//! ```no_run
//! use nlring::{Direction, FrameStatus, NetlinkSocket, RingManager, SMALL_RING_GEOMETRY, SOCKET_AUTOPID};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = NetlinkSocket::open(libc::NETLINK_ROUTE)?;
//! let mut rings = RingManager::new(socket);
//!
//! rings.configure_geometry(Direction::Rx, SMALL_RING_GEOMETRY)?;
//! rings.map(libc::MAP_SHARED)?;
//! rings.channel_mut().bind(0, SOCKET_AUTOPID)?;
//!
//! loop {
//!     rings.channel().poll_rx(None)?;
//!     let frame = rings.current_frame(Direction::Rx)?;
//!     if frame.status() == Some(FrameStatus::Valid) {
//!         // SAFETY: a valid rx frame belongs to user space until handed back.
//!         let message = unsafe { frame.message() };
//!         println!("received {} bytes", message.len());
//!     }
//!     frame.set_status(FrameStatus::Unused);
//!     rings.advance(Direction::Rx)?;
//! #   break;
//! }
//! rings.close()?;
//! # Ok(())
//! # }
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("nlring requires Linux netlink sockets");

mod channel;
mod config;
mod direction;
mod error;
mod frame;
mod invariants;
mod manager;
mod region;
mod ring;
mod socket;

pub use channel::{Channel, MmapRequest, NETLINK_RX_RING, NETLINK_TX_RING, SOL_NETLINK};
pub use config::{RingConfig, RingGeometry, LARGE_RING_GEOMETRY, SMALL_RING_GEOMETRY};
pub use direction::Direction;
pub use error::RingError;
pub use frame::{Frame, FrameHeader, FrameStatus, FRAME_ALIGNMENT, FRAME_HEADER_LEN};
pub use manager::RingManager;
pub use ring::{RingCursor, RingDescriptor};
pub use socket::{socket_buffer_size, NetlinkSocket, SOCKET_AUTOPID};
