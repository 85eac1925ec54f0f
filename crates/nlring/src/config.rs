use crate::frame::{FRAME_ALIGNMENT, FRAME_HEADER_LEN};
use crate::invariants::debug_assert_frame_in_range;
use crate::{Direction, RingError};

/// Block/frame layout of one ring direction.
///
/// A ring is `block_count` contiguous blocks of `block_size` bytes, each
/// holding `block_size / frame_size` frames. Frames never straddle blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    block_size: u32,
    block_count: u32,
    frame_size: u32,
    frame_count: u32,
}

impl RingGeometry {
    /// Creates a geometry, checking the assumptions frame addressing relies on.
    ///
    /// Whether `frame_count` matches `block_count * frames_per_block` is left
    /// to the kernel, which rejects inconsistent requests at registration.
    pub fn new(
        block_size: u32,
        block_count: u32,
        frame_size: u32,
        frame_count: u32,
    ) -> Result<Self, RingError> {
        let invalid =
            |reason: &'static str| -> Result<Self, RingError> { Err(RingError::InvalidGeometry { reason }) };

        if frame_size == 0 {
            return invalid("frame size is zero");
        }
        if (frame_size as usize) < FRAME_HEADER_LEN {
            return invalid("frame size is smaller than the frame header");
        }
        if frame_size as usize % FRAME_ALIGNMENT != 0 {
            return invalid("frame size is not a multiple of the frame alignment");
        }
        if block_size == 0 || block_size % frame_size != 0 {
            return invalid("block size is not a multiple of the frame size");
        }
        if frame_count == 0 {
            return invalid("frame count is zero");
        }
        let frames_per_block = block_size / frame_size;
        if frame_count % frames_per_block != 0 {
            return invalid("frame count is not a multiple of frames per block");
        }
        if ((frame_count / frames_per_block) as usize)
            .checked_mul(block_size as usize)
            .is_none()
        {
            return invalid("ring byte length overflows");
        }

        Ok(Self::from_parts(block_size, block_count, frame_size, frame_count))
    }

    /// Creates a geometry whose frame count fills every block.
    pub fn from_blocks(block_size: u32, block_count: u32, frame_size: u32) -> Result<Self, RingError> {
        if frame_size == 0 {
            return Err(RingError::InvalidGeometry {
                reason: "frame size is zero",
            });
        }
        let frame_count = block_count
            .checked_mul(block_size / frame_size)
            .ok_or(RingError::InvalidGeometry {
                reason: "frame count overflows",
            })?;
        Self::new(block_size, block_count, frame_size, frame_count)
    }

    /// Only for presets that are valid by construction.
    const fn from_parts(block_size: u32, block_count: u32, frame_size: u32, frame_count: u32) -> Self {
        Self {
            block_size,
            block_count,
            frame_size,
            frame_count,
        }
    }

    #[inline]
    pub const fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    pub const fn block_count(&self) -> u32 {
        self.block_count
    }

    #[inline]
    pub const fn frame_size(&self) -> u32 {
        self.frame_size
    }

    #[inline]
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Index of the last frame.
    #[inline]
    pub const fn frame_max(&self) -> u32 {
        self.frame_count - 1
    }

    #[inline]
    pub const fn frames_per_block(&self) -> u32 {
        self.block_size / self.frame_size
    }

    /// Bytes the kernel backs for this direction.
    ///
    /// Derived from the frame count, not `block_count`: this is the length
    /// the mapping is requested with and later released with.
    #[inline]
    pub const fn byte_len(&self) -> usize {
        ((self.frame_max() + 1) / self.frames_per_block()) as usize * self.block_size as usize
    }

    /// Byte offset of frame `position` from the start of this direction's ring.
    #[inline]
    pub fn frame_offset(&self, position: u32) -> usize {
        debug_assert_frame_in_range!(position, self.frame_max());
        let frames_per_block = self.frames_per_block();
        let block_index = (position / frames_per_block) as usize;
        let offset_in_block = (position % frames_per_block) as usize;
        block_index * self.block_size as usize + offset_in_block * self.frame_size as usize
    }
}

impl Default for RingGeometry {
    /// 64 blocks of 128 KiB, 16 KiB frames (8 MiB per direction).
    fn default() -> Self {
        Self::from_parts(16 * 8192, 64, 16384, 512)
    }
}

/// 4 blocks of 16 KiB with 4 KiB frames (64 KiB per direction).
pub const SMALL_RING_GEOMETRY: RingGeometry = RingGeometry::from_parts(16384, 4, 4096, 16);

/// 128 blocks of 256 KiB with 16 KiB frames (32 MiB per direction).
pub const LARGE_RING_GEOMETRY: RingGeometry = RingGeometry::from_parts(262144, 128, 16384, 2048);

/// Which directions to configure, and how to map them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Receive ring geometry, `None` to leave rx unconfigured.
    pub rx: Option<RingGeometry>,
    /// Transmit ring geometry, `None` to leave tx unconfigured.
    pub tx: Option<RingGeometry>,
    /// `mmap` flags (`MAP_SHARED` unless there is a reason not to).
    pub map_flags: libc::c_int,
}

impl RingConfig {
    /// Creates a configuration with no directions.
    pub const fn new() -> Self {
        Self {
            rx: None,
            tx: None,
            map_flags: libc::MAP_SHARED,
        }
    }

    /// Geometry configured for `direction`.
    #[inline]
    pub const fn geometry(&self, direction: Direction) -> Option<RingGeometry> {
        match direction {
            Direction::Rx => self.rx,
            Direction::Tx => self.tx,
        }
    }

    /// Sets the receive ring geometry.
    pub fn with_rx(mut self, geometry: RingGeometry) -> Self {
        self.rx = Some(geometry);
        self
    }

    /// Sets the transmit ring geometry.
    pub fn with_tx(mut self, geometry: RingGeometry) -> Self {
        self.tx = Some(geometry);
        self
    }

    /// Sets the `mmap` flags.
    pub fn with_map_flags(mut self, flags: libc::c_int) -> Self {
        self.map_flags = flags;
        self
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new()
            .with_rx(RingGeometry::default())
            .with_tx(RingGeometry::default())
    }
}
