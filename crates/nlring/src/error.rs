//! Error types for ring configuration, mapping and frame access.

use crate::Direction;
use std::io;
use thiserror::Error;

/// Errors returned by the ring subsystem.
///
/// Nothing is retried internally. Variants that wrap an [`io::Error`] keep the
/// OS error code of the failed call, see [`RingError::raw_os_error`].
#[derive(Debug, Error)]
pub enum RingError {
    /// `configure_ring` was called twice for a direction without an
    /// intervening `unmap`.
    #[error("{direction} ring is already configured")]
    AlreadyConfigured {
        /// The direction that already holds a descriptor.
        direction: Direction,
    },

    /// A raw direction tag did not name a known direction.
    #[error("invalid ring direction tag {0}")]
    InvalidDirection(u32),

    /// The geometry breaks an assumption the frame addressing depends on.
    #[error("invalid ring geometry: {reason}")]
    InvalidGeometry {
        /// Which assumption was broken.
        reason: &'static str,
    },

    /// `map` was called with neither direction configured.
    #[error("no ring configured")]
    NoRingConfigured,

    /// `map` or `configure_ring` was called while a mapping is active.
    #[error("ring is already mapped")]
    AlreadyMapped,

    /// The kernel rejected the ring registration.
    #[error("failed to register {direction} ring: {source}")]
    Register {
        /// Direction whose registration failed.
        direction: Direction,
        /// Error returned by the channel's option call.
        #[source]
        source: io::Error,
    },

    /// The OS refused the shared mapping.
    #[error("failed to map ring: {0}")]
    MapFailed(#[source] io::Error),

    /// The direction was never configured.
    #[error("{direction} ring is not configured")]
    NotConfigured {
        /// The direction that was asked for.
        direction: Direction,
    },

    /// The direction is configured but has no live mapping.
    #[error("{direction} ring is not mapped")]
    NotMapped {
        /// The direction that was asked for.
        direction: Direction,
    },

    /// `unmap` was called with no active mapping.
    #[error("no active ring mapping")]
    NoActiveMapping,

    /// The OS failed to release the mapping.
    #[error("failed to unmap ring: {0}")]
    UnmapFailed(#[source] io::Error),

    /// Closing the channel failed.
    #[error("failed to close channel: {0}")]
    Close(#[source] io::Error),
}

impl RingError {
    /// Returns `true` if this error wraps a failed OS call.
    #[inline]
    pub fn is_os_error(&self) -> bool {
        self.io_error().is_some()
    }

    /// Returns the OS error code of the failed call, if there was one.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.io_error().and_then(io::Error::raw_os_error)
    }

    fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Register { source, .. } => Some(source),
            Self::MapFailed(e) | Self::UnmapFailed(e) | Self::Close(e) => Some(e),
            _ => None,
        }
    }
}
