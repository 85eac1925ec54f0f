use crate::invariants::debug_assert_head_in_range;
use crate::{Direction, Frame, RingError, RingGeometry};
use std::ptr::NonNull;

// =============================================================================
// CURSOR PROTOCOL
// =============================================================================
//
// Each direction has exactly one logical owner: the receive consumer or the
// transmit producer. The owner reads the frame under `head`, hands it over by
// writing the frame's status word, then advances `head`. No atomics guard
// `head` itself; single ownership is enforced by `advance` taking `&mut self`.
//
// The base address is a non-owning view into the `MappedRegion` owned by the
// `RingManager`. It is installed by `map` and cleared by `unmap`; once cleared
// every frame access fails with `NotMapped` instead of computing a stale
// address. Frame views borrow the descriptor, and the descriptor borrows the
// manager, so no view survives an unmap.
//
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    /// Registered with the kernel, never mapped.
    Unmapped,
    /// Live view into the shared mapping.
    Mapped(NonNull<u8>),
    /// Was mapped; the mapping has been released.
    Released,
}

/// Geometry and cursor of one direction of a mapped ring.
///
/// Callers only ever see it behind `&`; cursor movement goes through
/// [`RingCursor`] or [`RingManager::advance`](crate::RingManager::advance).
#[derive(Debug)]
pub struct RingDescriptor {
    direction: Direction,
    geometry: RingGeometry,
    head: u32,
    backing: Backing,
}

// Only the base pointer prevents the auto impl; it points into a mapping
// owned by the RingManager, which outlives every borrow of the descriptor.
unsafe impl Send for RingDescriptor {}

impl RingDescriptor {
    pub(crate) fn new(direction: Direction, geometry: RingGeometry) -> Self {
        Self {
            direction,
            geometry,
            head: 0,
            backing: Backing::Unmapped,
        }
    }

    // ---------------------------------------------------------------------
    // GEOMETRY
    // ---------------------------------------------------------------------

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn geometry(&self) -> &RingGeometry {
        &self.geometry
    }

    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.geometry.frame_size()
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size()
    }

    /// Index of the last frame.
    #[inline]
    pub fn frame_max(&self) -> u32 {
        self.geometry.frame_max()
    }

    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.geometry.frame_count()
    }

    /// Length of this direction's share of the mapping.
    #[inline]
    pub fn frame_byte_length(&self) -> usize {
        self.geometry.byte_len()
    }

    /// Current cursor, in `[0, frame_max]`.
    #[inline]
    pub fn head(&self) -> u32 {
        self.head
    }

    // ---------------------------------------------------------------------
    // MAPPING STATE
    // ---------------------------------------------------------------------

    /// Start of this direction's frames, if mapped.
    #[inline]
    pub fn base(&self) -> Option<NonNull<u8>> {
        match self.backing {
            Backing::Mapped(base) => Some(base),
            Backing::Unmapped | Backing::Released => None,
        }
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped(_))
    }

    /// Whether an `unmap` released this descriptor's mapping.
    #[inline]
    pub(crate) fn is_released(&self) -> bool {
        self.backing == Backing::Released
    }

    /// `base` must point at `frame_byte_length()` bytes that stay mapped
    /// until `release` is called.
    pub(crate) fn install(&mut self, base: NonNull<u8>) {
        debug_assert!(!self.is_mapped(), "{} ring mapped twice", self.direction);
        self.backing = Backing::Mapped(base);
    }

    pub(crate) fn release(&mut self) {
        self.backing = Backing::Released;
        self.head = 0;
    }

    #[inline]
    fn mapped_base(&self) -> Result<NonNull<u8>, RingError> {
        self.base().ok_or(RingError::NotMapped {
            direction: self.direction,
        })
    }

    // ---------------------------------------------------------------------
    // FRAME ACCESS
    // ---------------------------------------------------------------------

    /// Address of frame `position`.
    ///
    /// # Panics
    ///
    /// If `position > frame_max()`. Indices come from the cursor or from the
    /// caller's own bookkeeping, so an out-of-range index is a bug.
    pub fn address_of(&self, position: u32) -> Result<NonNull<u8>, RingError> {
        let base = self.mapped_base()?;
        assert!(
            position <= self.frame_max(),
            "frame index {} outside {} ring [0, {}]",
            position,
            self.direction,
            self.frame_max()
        );
        let offset = self.geometry.frame_offset(position);
        // SAFETY: position is in range, so offset < frame_byte_length(), and
        // base is valid for that many bytes while mapped.
        Ok(unsafe { NonNull::new_unchecked(base.as_ptr().add(offset)) })
    }

    /// View of frame `position`.
    pub fn frame(&self, position: u32) -> Result<Frame<'_>, RingError> {
        let ptr = self.address_of(position)?;
        Ok(Frame::new(ptr, self.frame_size() as usize))
    }

    /// View of the frame under the cursor.
    #[inline]
    pub fn current_frame(&self) -> Result<Frame<'_>, RingError> {
        self.frame(self.head)
    }

    /// Moves the cursor to the next frame, wrapping to 0 after `frame_max`.
    pub(crate) fn advance(&mut self) -> Result<(), RingError> {
        self.mapped_base()?;
        self.head = if self.head != self.frame_max() {
            self.head + 1
        } else {
            0
        };
        debug_assert_head_in_range!(self.head, self.frame_max());
        Ok(())
    }
}

/// Exclusive handle on one mapped direction, for moving its cursor.
///
/// Lends the descriptor's frame access and cursor without lending the
/// descriptor itself, so a descriptor can never be moved into a manager
/// that does not own its mapping:
///
/// ```compile_fail
/// use nlring::{Direction, NetlinkSocket, RingError, RingManager};
///
/// fn swap_rings(
///     a: &mut RingManager<NetlinkSocket>,
///     b: &mut RingManager<NetlinkSocket>,
/// ) -> Result<(), RingError> {
///     let mut a_rx = a.get_ring_mut(Direction::Rx)?;
///     let mut b_rx = b.get_ring_mut(Direction::Rx)?;
///     std::mem::swap(&mut *a_rx, &mut *b_rx);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct RingCursor<'a> {
    ring: &'a mut RingDescriptor,
}

impl<'a> RingCursor<'a> {
    pub(crate) fn new(ring: &'a mut RingDescriptor) -> Self {
        debug_assert!(ring.is_mapped());
        Self { ring }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.ring.direction()
    }

    #[inline]
    pub fn geometry(&self) -> &RingGeometry {
        self.ring.geometry()
    }

    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.ring.frame_size()
    }

    #[inline]
    pub fn block_size(&self) -> u32 {
        self.ring.block_size()
    }

    #[inline]
    pub fn frame_max(&self) -> u32 {
        self.ring.frame_max()
    }

    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.ring.frame_count()
    }

    #[inline]
    pub fn frame_byte_length(&self) -> usize {
        self.ring.frame_byte_length()
    }

    #[inline]
    pub fn head(&self) -> u32 {
        self.ring.head()
    }

    #[inline]
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.ring.base()
    }

    /// See [`RingDescriptor::address_of`].
    pub fn address_of(&self, position: u32) -> Result<NonNull<u8>, RingError> {
        self.ring.address_of(position)
    }

    pub fn frame(&self, position: u32) -> Result<Frame<'_>, RingError> {
        self.ring.frame(position)
    }

    #[inline]
    pub fn current_frame(&self) -> Result<Frame<'_>, RingError> {
        self.ring.current_frame()
    }

    #[inline]
    pub fn advance(&mut self) -> Result<(), RingError> {
        self.ring.advance()
    }
}
