use crate::invariants::{debug_assert_base_at, debug_assert_mapping_covered};
use crate::region::MappedRegion;
use crate::{Channel, Direction, Frame, MmapRequest, RingConfig, RingCursor, RingDescriptor, RingError, RingGeometry};
use crossbeam_utils::CachePadded;

/// Brings mapped rings up on a channel and tears them down again.
///
/// Bring-up is two-phase: [`configure_ring`] registers each direction's
/// geometry with the kernel, then [`map`] maps every configured direction
/// with one `mmap` call. The mapping is laid out rx first, tx after it:
///
/// ```text
///  base                      base + rx_len              base + rx_len + tx_len
///   ├──────── rx frames ────────┼──────── tx frames ────────┤
/// ```
///
/// A sole configured direction occupies the whole mapping.
///
/// The manager owns both the channel and the mapping. Dropping it releases
/// the mapping before the channel's descriptor.
///
/// [`configure_ring`]: RingManager::configure_ring
/// [`map`]: RingManager::map
#[derive(Debug)]
pub struct RingManager<C: Channel> {
    // Field order matters: the region must drop before the channel.
    region: Option<MappedRegion>,
    rx: CachePadded<Option<RingDescriptor>>,
    tx: CachePadded<Option<RingDescriptor>>,
    channel: C,
}

impl<C: Channel> RingManager<C> {
    /// Wraps a channel with no rings configured.
    pub fn new(channel: C) -> Self {
        Self {
            region: None,
            rx: CachePadded::new(None),
            tx: CachePadded::new(None),
            channel,
        }
    }

    /// The underlying channel.
    #[inline]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The underlying channel, mutably (e.g. to bind it).
    #[inline]
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    #[inline]
    fn slot(&self, direction: Direction) -> &Option<RingDescriptor> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    #[inline]
    fn slot_mut(&mut self, direction: Direction) -> &mut Option<RingDescriptor> {
        match direction {
            Direction::Rx => &mut self.rx,
            Direction::Tx => &mut self.tx,
        }
    }

    // ---------------------------------------------------------------------
    // PHASE 1: CONFIGURE
    // ---------------------------------------------------------------------

    /// Registers a ring for `direction` with the kernel.
    ///
    /// On failure the direction is left exactly as it was.
    pub fn configure_ring(
        &mut self,
        direction: Direction,
        block_size: u32,
        block_count: u32,
        frame_size: u32,
        frame_count: u32,
    ) -> Result<(), RingError> {
        self.ensure_configurable(direction)?;
        let geometry = RingGeometry::new(block_size, block_count, frame_size, frame_count)?;
        self.configure_geometry(direction, geometry)
    }

    /// A direction takes a new geometry only while it holds no live
    /// descriptor and nothing is mapped.
    fn ensure_configurable(&self, direction: Direction) -> Result<(), RingError> {
        if self.slot(direction).as_ref().is_some_and(|ring| !ring.is_released()) {
            return Err(RingError::AlreadyConfigured { direction });
        }
        if self.region.is_some() {
            return Err(RingError::AlreadyMapped);
        }
        Ok(())
    }

    /// Same as [`configure_ring`](RingManager::configure_ring) with a prepared geometry.
    pub fn configure_geometry(&mut self, direction: Direction, geometry: RingGeometry) -> Result<(), RingError> {
        self.ensure_configurable(direction)?;

        let ring = RingDescriptor::new(direction, geometry);
        let req = MmapRequest::from(&geometry);
        self.channel
            .set_option(direction.socket_option(), &req.to_bytes())
            .map_err(|source| RingError::Register { direction, source })?;

        *self.slot_mut(direction) = Some(ring);

        tracing::debug!(
            %direction,
            block_size = geometry.block_size(),
            block_count = geometry.block_count(),
            frame_size = geometry.frame_size(),
            frame_count = geometry.frame_count(),
            "ring configured"
        );
        Ok(())
    }

    /// Configures every direction `config` names, rx first.
    ///
    /// Each direction is configured atomically on its own: if tx fails after
    /// rx succeeded, rx stays configured.
    pub fn configure(&mut self, config: &RingConfig) -> Result<(), RingError> {
        for direction in Direction::ALL {
            if let Some(geometry) = config.geometry(direction) {
                self.configure_geometry(direction, geometry)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // PHASE 2: MAP
    // ---------------------------------------------------------------------

    /// Maps every configured direction with one shared mapping.
    ///
    /// `flags` are the `mmap` flags, normally `MAP_SHARED`. Either every
    /// configured descriptor gets its base, or (on error) none does.
    pub fn map(&mut self, flags: libc::c_int) -> Result<(), RingError> {
        if self.region.is_some() {
            return Err(RingError::AlreadyMapped);
        }
        if !self.is_configured(Direction::Rx) && !self.is_configured(Direction::Tx) {
            return Err(RingError::NoRingConfigured);
        }

        let byte_len = |slot: &Option<RingDescriptor>| slot.as_ref().map_or(0, RingDescriptor::frame_byte_length);
        let rx_len = byte_len(self.slot(Direction::Rx));
        let tx_len = byte_len(self.slot(Direction::Tx));
        let len = rx_len
            .checked_add(tx_len)
            .ok_or_else(|| RingError::MapFailed(std::io::Error::from_raw_os_error(libc::ENOMEM)))?;

        let region =
            MappedRegion::map(self.channel.raw_descriptor(), len, flags).map_err(RingError::MapFailed)?;

        if let Some(rx) = self.slot_mut(Direction::Rx).as_mut() {
            rx.install(region.as_ptr());
        }
        if let Some(tx) = self.slot_mut(Direction::Tx).as_mut() {
            tx.install(region.at(rx_len));
        }
        debug_assert_mapping_covered!(rx_len, tx_len, region.len());

        tracing::debug!(addr = ?region.as_ptr(), rx_len, tx_len, "ring mapped");
        self.region = Some(region);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // TEARDOWN
    // ---------------------------------------------------------------------

    /// Releases the mapping and clears both descriptors' bases and cursors.
    ///
    /// The descriptors stay configured, and a released direction may be
    /// configured again. The mapping is consumed even if `munmap` fails.
    pub fn unmap(&mut self) -> Result<(), RingError> {
        let region = self.region.take().ok_or(RingError::NoActiveMapping)?;

        // Sum tx then rx; the address handed back is the lowest one, which
        // is rx's base whenever rx exists.
        let mut addr = None;
        let mut len = 0;
        for direction in [Direction::Tx, Direction::Rx] {
            if let Some(ring) = self.slot_mut(direction).as_mut() {
                addr = ring.base();
                len += ring.frame_byte_length();
                ring.release();
            }
        }

        debug_assert_mapping_covered!(len, 0, region.len());
        if let Some(addr) = addr {
            debug_assert_base_at!("lowest", addr.as_ptr(), region.as_ptr().as_ptr());
        }

        tracing::debug!(addr = ?region.as_ptr(), len, "ring unmapped");
        region.unmap().map_err(RingError::UnmapFailed)
    }

    /// Unmaps (if mapped), then closes the channel.
    ///
    /// The channel is closed even if the unmap fails; the unmap error wins.
    pub fn close(mut self) -> Result<(), RingError> {
        let unmapped = if self.region.is_some() { self.unmap() } else { Ok(()) };

        let RingManager { region, channel, .. } = self;
        debug_assert!(region.is_none());
        let closed = channel.close().map_err(RingError::Close);

        tracing::debug!("ring channel closed");
        unmapped.and(closed)
    }

    // ---------------------------------------------------------------------
    // ACCESS
    // ---------------------------------------------------------------------

    /// Whether a mapping is active.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.region.is_some()
    }

    /// Length of the active mapping.
    #[inline]
    pub fn mapping_len(&self) -> Option<usize> {
        self.region.as_ref().map(MappedRegion::len)
    }

    /// Whether `direction` holds a descriptor, mapped or not.
    #[inline]
    pub fn is_configured(&self, direction: Direction) -> bool {
        self.slot(direction).is_some()
    }

    fn mapped(slot: &Option<RingDescriptor>, direction: Direction) -> Result<&RingDescriptor, RingError> {
        match slot {
            None => Err(RingError::NotConfigured { direction }),
            Some(ring) if !ring.is_mapped() => Err(RingError::NotMapped { direction }),
            Some(ring) => Ok(ring),
        }
    }

    fn mapped_mut(slot: &mut Option<RingDescriptor>, direction: Direction) -> Result<RingCursor<'_>, RingError> {
        match slot {
            None => Err(RingError::NotConfigured { direction }),
            Some(ring) if !ring.is_mapped() => Err(RingError::NotMapped { direction }),
            Some(ring) => Ok(RingCursor::new(ring)),
        }
    }

    /// The mapped descriptor for `direction`.
    pub fn get_ring(&self, direction: Direction) -> Result<&RingDescriptor, RingError> {
        Self::mapped(self.slot(direction), direction)
    }

    /// Cursor handle on the mapped `direction`.
    pub fn get_ring_mut(&mut self, direction: Direction) -> Result<RingCursor<'_>, RingError> {
        Self::mapped_mut(self.slot_mut(direction), direction)
    }

    /// Cursor handles on both directions at once, so the rx consumer and the
    /// tx producer can each own one (e.g. on separate threads).
    pub fn split_mut(&mut self) -> (Result<RingCursor<'_>, RingError>, Result<RingCursor<'_>, RingError>) {
        let rx = Self::mapped_mut(&mut self.rx, Direction::Rx);
        let tx = Self::mapped_mut(&mut self.tx, Direction::Tx);
        (rx, tx)
    }

    /// Frame under `direction`'s cursor.
    pub fn current_frame(&self, direction: Direction) -> Result<Frame<'_>, RingError> {
        self.get_ring(direction)?.current_frame()
    }

    /// Advances `direction`'s cursor.
    pub fn advance(&mut self, direction: Direction) -> Result<(), RingError> {
        self.get_ring_mut(direction)?.advance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SMALL_RING_GEOMETRY;
    use std::cell::{Cell, RefCell};
    use std::io;
    use std::os::fd::{AsRawFd, RawFd};
    use std::rc::Rc;
    use tempfile::NamedTempFile;

    /// Whether any mapping of `file` is present in this process.
    fn file_is_mapped(file: &NamedTempFile) -> bool {
        let path = file.path().canonicalize().unwrap();
        let path = path.to_str().unwrap();
        std::fs::read_to_string("/proc/self/maps")
            .unwrap()
            .lines()
            .any(|line| line.split_whitespace().nth(5) == Some(path))
    }

    /// Channel over a scratch file; every registration grows the file.
    struct ScratchChannel {
        file: NamedTempFile,
        registered: RefCell<Vec<(libc::c_int, MmapRequest)>>,
        reject: Option<i32>,
        /// Set by `close`: whether the file was still mapped at that moment.
        mapped_at_close: Rc<Cell<Option<bool>>>,
    }

    impl ScratchChannel {
        fn new() -> Self {
            Self {
                file: NamedTempFile::new().unwrap(),
                registered: RefCell::new(Vec::new()),
                reject: None,
                mapped_at_close: Rc::new(Cell::new(None)),
            }
        }

        fn rejecting(errno: i32) -> Self {
            Self {
                reject: Some(errno),
                ..Self::new()
            }
        }
    }

    impl Channel for ScratchChannel {
        fn raw_descriptor(&self) -> RawFd {
            self.file.as_file().as_raw_fd()
        }

        fn set_option(&self, option: libc::c_int, value: &[u8]) -> io::Result<()> {
            if let Some(errno) = self.reject {
                return Err(io::Error::from_raw_os_error(errno));
            }
            let req = MmapRequest::from_bytes(value).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
            let mut registered = self.registered.borrow_mut();
            registered.retain(|(o, _)| *o != option);
            registered.push((option, req));
            let total: u64 = registered
                .iter()
                .map(|(_, r)| r.block_size as u64 * r.block_nr as u64)
                .sum();
            self.file.as_file().set_len(total)
        }

        fn close(self) -> io::Result<()> {
            self.mapped_at_close.set(Some(file_is_mapped(&self.file)));
            Ok(())
        }
    }

    fn configure_small(manager: &mut RingManager<ScratchChannel>, direction: Direction) -> Result<(), RingError> {
        manager.configure_geometry(direction, SMALL_RING_GEOMETRY)
    }

    #[test]
    fn test_configure_registers_request() {
        let mut manager = RingManager::new(ScratchChannel::new());
        manager.configure_ring(Direction::Tx, 16384, 4, 4096, 16).unwrap();

        let registered = manager.channel().registered.borrow();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0, crate::NETLINK_TX_RING);
        assert_eq!(registered[0].1, MmapRequest::from(&SMALL_RING_GEOMETRY));
        drop(registered);

        assert!(manager.is_configured(Direction::Tx));
        assert!(!manager.is_configured(Direction::Rx));
        assert!(matches!(
            manager.get_ring(Direction::Tx),
            Err(RingError::NotMapped {
                direction: Direction::Tx
            })
        ));
    }

    #[test]
    fn test_rejected_registration_rolls_back() {
        let mut manager = RingManager::new(ScratchChannel::rejecting(libc::ENOPROTOOPT));
        let err = configure_small(&mut manager, Direction::Rx).unwrap_err();

        assert!(matches!(
            err,
            RingError::Register {
                direction: Direction::Rx,
                ..
            }
        ));
        assert_eq!(err.raw_os_error(), Some(libc::ENOPROTOOPT));
        assert!(!manager.is_configured(Direction::Rx));
        assert!(matches!(manager.map(libc::MAP_SHARED), Err(RingError::NoRingConfigured)));
    }

    #[test]
    fn test_reconfigure_rejected_before_geometry_checks() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();

        let err = manager.configure_ring(Direction::Rx, 16384, 4, 0, 16).unwrap_err();
        assert!(matches!(
            err,
            RingError::AlreadyConfigured {
                direction: Direction::Rx
            }
        ));

        manager.map(libc::MAP_SHARED).unwrap();
        let err = manager.configure_ring(Direction::Tx, 16384, 4, 0, 16).unwrap_err();
        assert!(matches!(err, RingError::AlreadyMapped));
    }

    #[test]
    fn test_invalid_geometry_never_reaches_channel() {
        let mut manager = RingManager::new(ScratchChannel::new());
        let err = manager.configure_ring(Direction::Rx, 16384, 4, 5000, 16).unwrap_err();
        assert!(matches!(err, RingError::InvalidGeometry { .. }));
        assert!(manager.channel().registered.borrow().is_empty());
    }

    #[test]
    fn test_configure_while_mapped_is_rejected() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();

        assert!(matches!(
            configure_small(&mut manager, Direction::Tx),
            Err(RingError::AlreadyMapped)
        ));
        assert!(matches!(
            configure_small(&mut manager, Direction::Rx),
            Err(RingError::AlreadyConfigured { .. })
        ));
        assert!(matches!(manager.map(libc::MAP_SHARED), Err(RingError::AlreadyMapped)));
    }

    #[test]
    fn test_failed_map_installs_nothing() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();
        configure_small(&mut manager, Direction::Tx).unwrap();

        // neither MAP_SHARED nor MAP_PRIVATE
        let err = manager.map(0).unwrap_err();
        assert!(matches!(err, RingError::MapFailed(_)));
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));

        assert!(!manager.is_mapped());
        for direction in Direction::ALL {
            assert!(matches!(manager.get_ring(direction), Err(RingError::NotMapped { .. })));
        }
    }

    #[test]
    fn test_unmap_without_mapping() {
        let mut manager = RingManager::new(ScratchChannel::new());
        assert!(matches!(manager.unmap(), Err(RingError::NoActiveMapping)));
    }

    #[test]
    fn test_released_direction_can_be_reconfigured() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();
        manager.unmap().unwrap();

        let bigger = RingGeometry::from_blocks(16384, 8, 4096).unwrap();
        manager.configure_geometry(Direction::Rx, bigger).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();

        assert_eq!(manager.mapping_len(), Some(131072));
        assert_eq!(manager.get_ring(Direction::Rx).unwrap().frame_count(), 32);
    }

    #[test]
    fn test_failed_reconfigure_keeps_released_descriptor() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();
        manager.unmap().unwrap();

        manager.channel_mut().reject = Some(libc::EBUSY);
        let bigger = RingGeometry::from_blocks(16384, 8, 4096).unwrap();
        assert!(manager.configure_geometry(Direction::Rx, bigger).is_err());

        manager.channel_mut().reject = None;
        manager.map(libc::MAP_SHARED).unwrap();
        assert_eq!(manager.get_ring(Direction::Rx).unwrap().geometry(), &SMALL_RING_GEOMETRY);
    }

    #[test]
    fn test_split_mut_hands_out_both_directions() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();
        configure_small(&mut manager, Direction::Tx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();

        let (rx, tx) = manager.split_mut();
        let (mut rx, mut tx) = (rx.unwrap(), tx.unwrap());
        rx.advance().unwrap();
        tx.advance().unwrap();
        tx.advance().unwrap();

        assert_eq!(manager.get_ring(Direction::Rx).unwrap().head(), 1);
        assert_eq!(manager.get_ring(Direction::Tx).unwrap().head(), 2);
    }

    #[test]
    fn test_split_mut_reports_missing_direction() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Tx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();

        let (rx, tx) = manager.split_mut();
        assert!(matches!(
            rx,
            Err(RingError::NotConfigured {
                direction: Direction::Rx
            })
        ));
        assert!(tx.is_ok());
    }

    #[test]
    fn test_close_unmaps_first() {
        let channel = ScratchChannel::new();
        let mapped_at_close = Rc::clone(&channel.mapped_at_close);
        let mut manager = RingManager::new(channel);
        configure_small(&mut manager, Direction::Rx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();
        assert!(file_is_mapped(&manager.channel().file));

        manager.close().unwrap();
        assert_eq!(mapped_at_close.get(), Some(false));
    }

    #[test]
    fn test_unmap_removes_mapping() {
        let mut manager = RingManager::new(ScratchChannel::new());
        configure_small(&mut manager, Direction::Rx).unwrap();
        configure_small(&mut manager, Direction::Tx).unwrap();
        manager.map(libc::MAP_SHARED).unwrap();
        assert!(file_is_mapped(&manager.channel().file));

        manager.unmap().unwrap();
        assert!(!file_is_mapped(&manager.channel().file));
    }
}
