//! Borrowed views of individual frames in a mapped ring.
//!
//! Every frame starts with a kernel-defined [`FrameHeader`] followed by the
//! message payload. Who may touch a frame is decided by its status word: the
//! kernel hands a frame to user space by storing [`FrameStatus::Valid`] (or
//! [`FrameStatus::Copy`]) and user space hands it back with
//! [`FrameStatus::Unused`]. On the transmit side the roles swap.
//!
//! The ring itself never reads or waits on the status; [`Frame`] only gives
//! ordered access to it.

use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

/// Alignment of frames and frame headers (`NL_MMAP_MSG_ALIGNMENT`).
pub const FRAME_ALIGNMENT: usize = 4;

/// Frame header length rounded up to [`FRAME_ALIGNMENT`] (`NL_MMAP_HDRLEN`).
pub const FRAME_HEADER_LEN: usize =
    (mem::size_of::<FrameHeader>() + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1);

/// Kernel frame header (`struct nl_mmap_hdr`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    /// Ownership word, see [`FrameStatus`].
    pub status: u32,
    /// Length of the message following the header.
    pub len: u32,
    /// Multicast group the message was delivered to.
    pub group: u32,
    /// Sender port id.
    pub pid: u32,
    /// Sender credentials.
    pub uid: u32,
    pub gid: u32,
}

/// Frame ownership states (`enum nl_mmap_status`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Free for the producer.
    Unused = 0,
    /// Claimed by the kernel, being filled.
    Reserved = 1,
    /// Holds a complete message.
    Valid = 2,
    /// Message did not fit; read it with a regular receive call.
    Copy = 3,
    /// Nothing to consume; skip the frame.
    Skip = 4,
}

impl TryFrom<u32> for FrameStatus {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => FrameStatus::Unused,
            1 => FrameStatus::Reserved,
            2 => FrameStatus::Valid,
            3 => FrameStatus::Copy,
            4 => FrameStatus::Skip,
            other => return Err(other),
        })
    }
}

/// One frame of a mapped ring.
///
/// Borrows the descriptor it came from, so it cannot outlive the mapping.
#[derive(Debug)]
pub struct Frame<'a> {
    ptr: NonNull<u8>,
    size: usize,
    _ring: PhantomData<&'a ()>,
}

impl<'a> Frame<'a> {
    /// `ptr` must be [`FRAME_ALIGNMENT`]-aligned and valid for `size` bytes
    /// for `'a`, with `size >= FRAME_HEADER_LEN`.
    pub(crate) fn new(ptr: NonNull<u8>, size: usize) -> Self {
        debug_assert!(size >= FRAME_HEADER_LEN);
        debug_assert_eq!(ptr.as_ptr() as usize % FRAME_ALIGNMENT, 0);
        Self {
            ptr,
            size,
            _ring: PhantomData,
        }
    }

    /// Address of the frame (its header).
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Frame size in bytes, header included.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Room for the message after the header.
    #[inline]
    pub fn payload_capacity(&self) -> usize {
        self.size - FRAME_HEADER_LEN
    }

    /// Address of the message payload.
    #[inline]
    pub fn payload_ptr(&self) -> *mut u8 {
        // SAFETY: size >= FRAME_HEADER_LEN, so the offset stays within the frame.
        unsafe { self.as_ptr().add(FRAME_HEADER_LEN) }
    }

    #[inline]
    fn status_word(&self) -> &AtomicU32 {
        // SAFETY: `status` is the first field of the header, the frame is
        // 4-byte aligned and valid for 'a. The kernel updates it concurrently,
        // so it is only ever accessed atomically.
        unsafe { &*self.ptr.as_ptr().cast::<AtomicU32>() }
    }

    /// Status word as stored, including values this crate does not know.
    #[inline]
    pub fn raw_status(&self) -> u32 {
        self.status_word().load(Ordering::Acquire)
    }

    /// Decoded status, `None` for unknown values.
    #[inline]
    pub fn status(&self) -> Option<FrameStatus> {
        FrameStatus::try_from(self.raw_status()).ok()
    }

    /// Publishes a new status. Everything written to the frame before this
    /// call is visible to whoever observes the new status.
    #[inline]
    pub fn set_status(&self, status: FrameStatus) {
        self.status_word().store(status as u32, Ordering::Release);
    }

    /// Pointer to the header word at byte `offset`; never the status word.
    #[inline]
    fn field_ptr(&self, offset: usize) -> *mut u32 {
        debug_assert!(offset != mem::offset_of!(FrameHeader, status));
        debug_assert!(offset + mem::size_of::<u32>() <= FRAME_HEADER_LEN);
        // SAFETY: offset names a u32 field inside the header, which lies
        // within the frame.
        unsafe { self.as_ptr().add(offset).cast::<u32>() }
    }

    #[inline]
    fn read_field(&self, offset: usize) -> u32 {
        // SAFETY: aligned header field inside the frame, valid for 'a.
        unsafe { ptr::read_volatile(self.field_ptr(offset)) }
    }

    /// Message length recorded in the header.
    #[inline]
    pub fn len(&self) -> u32 {
        self.read_field(mem::offset_of!(FrameHeader, len))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the message length; publish it with [`Frame::set_status`].
    #[inline]
    pub fn set_len(&self, len: u32) {
        // SAFETY: aligned header field inside the frame, valid for 'a.
        unsafe { ptr::write_volatile(self.field_ptr(mem::offset_of!(FrameHeader, len)), len) }
    }

    /// Snapshot of the header.
    ///
    /// The status is loaded first (Acquire), so the other fields read are
    /// the ones its writer published along with it.
    pub fn header(&self) -> FrameHeader {
        let status = self.raw_status();
        FrameHeader {
            status,
            len: self.read_field(mem::offset_of!(FrameHeader, len)),
            group: self.read_field(mem::offset_of!(FrameHeader, group)),
            pid: self.read_field(mem::offset_of!(FrameHeader, pid)),
            uid: self.read_field(mem::offset_of!(FrameHeader, uid)),
            gid: self.read_field(mem::offset_of!(FrameHeader, gid)),
        }
    }

    /// The message the header describes, clamped to the payload capacity.
    ///
    /// # Safety
    ///
    /// The caller must own the frame under the status protocol (for rx, the
    /// status is [`FrameStatus::Valid`] and has not been handed back), so the
    /// kernel does not write the payload while the slice is alive.
    pub unsafe fn message(&self) -> &'a [u8] {
        let len = (self.len() as usize).min(self.payload_capacity());
        // SAFETY: in-bounds per the clamp above; exclusivity per the contract.
        unsafe { std::slice::from_raw_parts(self.payload_ptr(), len) }
    }

    /// The whole payload area, for filling a transmit frame.
    ///
    /// # Safety
    ///
    /// The caller must own the frame under the status protocol (for tx, the
    /// status is [`FrameStatus::Unused`]) and must not hold any other slice
    /// of this frame while the returned one is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn payload_mut(&self) -> &'a mut [u8] {
        // SAFETY: in-bounds by construction; exclusivity per the contract.
        unsafe { std::slice::from_raw_parts_mut(self.payload_ptr(), self.payload_capacity()) }
    }
}
