//! Netlink socket: open, bind, send, receive and option plumbing.
//!
//! Thin wrappers over the socket syscalls. Message encoding is left to the
//! caller; this module moves opaque datagrams.

use crate::Channel;
use std::fmt;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

/// Port id that lets the kernel pick one at bind time.
pub const SOCKET_AUTOPID: u32 = 0;

/// Largest datagram worth preparing a receive buffer for:
/// `min(page size, 8192)`.
pub fn socket_buffer_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 {
        8192
    } else {
        (page as usize).min(8192)
    }
}

/// `poll` timeout for `remaining`, rounded up to whole milliseconds so a
/// short wait never turns into a non-blocking check.
fn poll_timeout_ms(remaining: Duration) -> libc::c_int {
    let ms = remaining.as_nanos().div_ceil(1_000_000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

/// An `AF_NETLINK` socket and its local address.
pub struct NetlinkSocket {
    fd: OwnedFd,
    addr: libc::sockaddr_nl,
}

const SOCKADDR_NL_LEN: libc::socklen_t = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;

fn empty_addr() -> libc::sockaddr_nl {
    // SAFETY: sockaddr_nl is plain data; all-zero is a valid value.
    unsafe { mem::zeroed() }
}

fn local_addr(fd: RawFd) -> io::Result<(libc::sockaddr_nl, libc::socklen_t)> {
    let mut addr = empty_addr();
    let mut len = SOCKADDR_NL_LEN;
    // SAFETY: addr is a writable sockaddr_nl and len holds its size; the
    // kernel writes at most len bytes.
    let ret = unsafe {
        libc::getsockname(
            fd,
            (&mut addr as *mut libc::sockaddr_nl).cast::<libc::sockaddr>(),
            &mut len,
        )
    };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok((addr, len))
}

impl NetlinkSocket {
    /// Opens a netlink socket for protocol `bus` (`NETLINK_ROUTE`, ...).
    pub fn open(bus: libc::c_int) -> io::Result<Self> {
        // SAFETY: plain socket(2) call; the result is checked.
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW | libc::SOCK_CLOEXEC, bus) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by socket(2) and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            addr: empty_addr(),
        })
    }

    /// Adopts an existing socket.
    ///
    /// If it is an already bound netlink socket its address is picked up;
    /// otherwise the port id reads as 0.
    pub fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        let (found, _) = local_addr(fd.as_raw_fd())?;
        let addr = if found.nl_family == libc::AF_NETLINK as libc::sa_family_t {
            found
        } else {
            empty_addr()
        };
        Ok(Self { fd, addr })
    }

    /// Binds to `groups` with port id `pid` ([`SOCKET_AUTOPID`] for automatic
    /// selection), then reads back the address the kernel assigned.
    pub fn bind(&mut self, groups: u32, pid: u32) -> io::Result<()> {
        self.addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        self.addr.nl_groups = groups;
        self.addr.nl_pid = pid;

        // SAFETY: addr is a valid sockaddr_nl of SOCKADDR_NL_LEN bytes.
        let ret = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                (&self.addr as *const libc::sockaddr_nl).cast::<libc::sockaddr>(),
                SOCKADDR_NL_LEN,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }

        let (addr, len) = local_addr(self.fd.as_raw_fd())?;
        if len != SOCKADDR_NL_LEN || addr.nl_family != libc::AF_NETLINK as libc::sa_family_t {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        self.addr = addr;

        tracing::debug!(portid = addr.nl_pid, groups = addr.nl_groups, "netlink socket bound");
        Ok(())
    }

    /// Port id of the socket. Not necessarily the process id.
    #[inline]
    pub fn portid(&self) -> u32 {
        self.addr.nl_pid
    }

    /// Multicast group mask the socket was bound with.
    #[inline]
    pub fn groups(&self) -> u32 {
        self.addr.nl_groups
    }

    /// Sends one datagram to the kernel.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let mut kernel = empty_addr();
        kernel.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        // SAFETY: buf is valid for buf.len() bytes; kernel is a valid sockaddr_nl.
        let ret = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                0,
                (&kernel as *const libc::sockaddr_nl).cast::<libc::sockaddr>(),
                SOCKADDR_NL_LEN,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    /// Receives one datagram into `buf`.
    ///
    /// A datagram larger than `buf` is an `ENOSPC` error rather than a silent
    /// truncation; size `buf` with [`socket_buffer_size`] to avoid it.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut from = empty_addr();
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        // SAFETY: msghdr is plain data; all-zero is a valid value.
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = (&mut from as *mut libc::sockaddr_nl).cast();
        msg.msg_namelen = SOCKADDR_NL_LEN;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        // SAFETY: msg points at live iovec/sockaddr storage for the call.
        let ret = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, 0) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        if msg.msg_flags & libc::MSG_TRUNC != 0 {
            return Err(io::Error::from_raw_os_error(libc::ENOSPC));
        }
        if msg.msg_namelen != SOCKADDR_NL_LEN {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(ret as usize)
    }

    /// Sets a `SOL_NETLINK` option.
    pub fn set_option(&self, option: libc::c_int, value: &[u8]) -> io::Result<()> {
        // SAFETY: value is valid for value.len() bytes.
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                crate::channel::SOL_NETLINK,
                option,
                value.as_ptr().cast(),
                value.len() as libc::socklen_t,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Reads a `SOL_NETLINK` option into `buf`, returning its length.
    pub fn get_option(&self, option: libc::c_int, buf: &mut [u8]) -> io::Result<usize> {
        let mut len = buf.len() as libc::socklen_t;
        // SAFETY: buf is writable for len bytes.
        let ret = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                crate::channel::SOL_NETLINK,
                option,
                buf.as_mut_ptr().cast(),
                &mut len,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(len as usize)
    }

    /// Waits until a datagram (or a ring frame) is ready to read.
    ///
    /// Returns `false` on timeout; `None` waits indefinitely. Interrupted
    /// waits resume with whatever is left of `timeout`. A pending socket
    /// error (e.g. `ENOBUFS` after an overrun) is returned as the error.
    pub fn poll_rx(&self, timeout: Option<Duration>) -> io::Result<bool> {
        // A deadline past what Instant can represent waits indefinitely.
        let deadline = timeout.and_then(|d| Instant::now().checked_add(d));

        loop {
            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => poll_timeout_ms(deadline.saturating_duration_since(Instant::now())),
            };
            let mut pfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN | libc::POLLERR,
                revents: 0,
            };
            // SAFETY: one valid pollfd.
            let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
            if ret == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if ret == 0 {
                return Ok(false);
            }
            if pfd.revents & libc::POLLERR != 0 {
                return Err(self.take_error());
            }
            return Ok(pfd.revents & libc::POLLIN != 0);
        }
    }

    fn take_error(&self) -> io::Error {
        let mut code: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: code is a writable c_int and len holds its size.
        let ret = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                (&mut code as *mut libc::c_int).cast(),
                &mut len,
            )
        };
        if ret == -1 {
            io::Error::last_os_error()
        } else if code == 0 {
            io::Error::from_raw_os_error(libc::EIO)
        } else {
            io::Error::from_raw_os_error(code)
        }
    }

    /// Closes the socket, reporting the result of `close(2)`.
    pub fn close(self) -> io::Result<()> {
        let fd = self.fd.into_raw_fd();
        // SAFETY: fd was owned by this socket and is closed exactly once here.
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Channel for NetlinkSocket {
    #[inline]
    fn raw_descriptor(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn set_option(&self, option: libc::c_int, value: &[u8]) -> io::Result<()> {
        NetlinkSocket::set_option(self, option, value)
    }

    fn close(self) -> io::Result<()> {
        NetlinkSocket::close(self)
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for NetlinkSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetlinkSocket")
            .field("fd", &self.fd.as_raw_fd())
            .field("portid", &self.addr.nl_pid)
            .field("groups", &self.addr.nl_groups)
            .finish()
    }
}
