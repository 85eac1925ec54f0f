use std::io;
use std::mem::ManuallyDrop;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};

/// The single shared mapping behind both ring directions.
///
/// Owns the mapping: it is released exactly once, either by [`unmap`] or,
/// if that never happens, on drop.
///
/// [`unmap`]: MappedRegion::unmap
#[derive(Debug)]
pub(crate) struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// The region is plain memory shared with the kernel; the raw pointer carries
// no thread affinity.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes of `fd` read/write with the given `mmap` flags.
    pub(crate) fn map(fd: RawFd, len: usize, flags: libc::c_int) -> io::Result<Self> {
        // SAFETY: mmap with a null hint only creates a new mapping; it never
        // touches existing memory. The result is checked against MAP_FAILED.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::from_raw_os_error(libc::EFAULT))?;
        Ok(Self { ptr, len })
    }

    /// Lowest address of the mapping.
    #[inline]
    pub(crate) fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Address `offset` bytes into the mapping.
    #[inline]
    pub(crate) fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset < self.len, "offset {} past mapping of {} bytes", offset, self.len);
        // SAFETY: offset is within the mapping, so the result is non-null and in bounds.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }

    /// Releases the mapping. The region is consumed even when `munmap` fails,
    /// so a failed release is never attempted twice.
    pub(crate) fn unmap(self) -> io::Result<()> {
        let this = ManuallyDrop::new(self);
        this.release()
    }

    fn release(&self) -> io::Result<()> {
        // SAFETY: ptr/len describe a mapping created by `map` that has not
        // been released; callers guarantee this runs once.
        let ret = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(
                addr = ?self.ptr,
                len = self.len,
                error = %e,
                "munmap of ring region failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_map_write_unmap() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(8192).unwrap();

        let region = MappedRegion::map(file.as_raw_fd(), 8192, libc::MAP_SHARED).unwrap();
        assert_eq!(region.len(), 8192);
        // SAFETY: offset 4096 is inside the fresh mapping.
        unsafe { region.at(4096).as_ptr().write(0xAB) };

        region.unmap().unwrap();

        use std::os::unix::fs::FileExt;
        let mut byte = [0u8; 1];
        file.read_at(&mut byte, 4096).unwrap();
        assert_eq!(byte[0], 0xAB);
    }

    #[test]
    fn test_map_bad_descriptor_fails() {
        let err = MappedRegion::map(-1, 4096, libc::MAP_SHARED).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_drop_releases_mapping() {
        let file = tempfile::tempfile().unwrap();
        file.set_len(4096).unwrap();
        let region = MappedRegion::map(file.as_raw_fd(), 4096, libc::MAP_SHARED).unwrap();
        drop(region);
    }
}
