//! Test channel backed by a scratch file.
//!
//! Registering a ring grows the file to the total size of all registered
//! rings, the way the kernel allocates ring memory, so `map` runs a real
//! `mmap`/`munmap` against it.

#![allow(dead_code)]

use nlring::{Channel, MmapRequest, NETLINK_RX_RING, NETLINK_TX_RING};
use std::cell::{Cell, RefCell};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::FileExt;
use std::rc::Rc;
use tempfile::NamedTempFile;

pub struct FileChannel {
    file: NamedTempFile,
    registered: RefCell<Vec<(libc::c_int, MmapRequest)>>,
    mapped_at_close: Rc<Cell<Option<bool>>>,
    pub reject_with: Option<i32>,
}

impl FileChannel {
    pub fn new() -> Self {
        Self {
            file: NamedTempFile::new().expect("scratch file"),
            registered: RefCell::new(Vec::new()),
            mapped_at_close: Rc::new(Cell::new(None)),
            reject_with: None,
        }
    }

    /// Requests registered so far, by socket option.
    pub fn registered(&self) -> Vec<(libc::c_int, MmapRequest)> {
        self.registered.borrow().clone()
    }

    /// Reads a native-endian u32 at `offset` of the backing file.
    pub fn read_u32(&self, offset: u64) -> u32 {
        let mut word = [0u8; 4];
        self.file.as_file().read_exact_at(&mut word, offset).expect("read backing file");
        u32::from_ne_bytes(word)
    }

    /// Whether the backing file is mapped anywhere in this process.
    pub fn is_mapped(&self) -> bool {
        let path = self.file.path().canonicalize().expect("scratch file path");
        let path = path.to_str().expect("utf-8 path");
        std::fs::read_to_string("/proc/self/maps")
            .expect("read /proc/self/maps")
            .lines()
            .any(|line| line.split_whitespace().nth(5) == Some(path))
    }

    /// Filled in by `close`: whether the file was still mapped at that point.
    pub fn mapped_at_close(&self) -> Rc<Cell<Option<bool>>> {
        Rc::clone(&self.mapped_at_close)
    }
}

impl Channel for FileChannel {
    fn raw_descriptor(&self) -> RawFd {
        self.file.as_file().as_raw_fd()
    }

    fn set_option(&self, option: libc::c_int, value: &[u8]) -> io::Result<()> {
        if let Some(errno) = self.reject_with {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if option != NETLINK_RX_RING && option != NETLINK_TX_RING {
            return Err(io::Error::from_raw_os_error(libc::ENOPROTOOPT));
        }
        let req = MmapRequest::from_bytes(value).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        if req.block_nr * (req.block_size / req.frame_size) != req.frame_nr {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }

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
        self.mapped_at_close.set(Some(self.is_mapped()));
        Ok(())
    }
}
