//! Raw `AF_UNIX`/`SOCK_SEQPACKET` socket primitives for the cloud-client
//! link (§4.5, §6). Thin, panic-free wrappers around the libc calls,
//! non-blocking by construction, driven through `tokio::io::unix::AsyncFd`
//! by the caller.

use libc::{c_int, sockaddr, sockaddr_un, socklen_t, AF_UNIX, SOCK_CLOEXEC, SOCK_NONBLOCK};
use std::{
    io::{Error, ErrorKind, Result},
    mem::{size_of, MaybeUninit},
    os::unix::io::{AsRawFd, IntoRawFd, RawFd},
    path::Path,
};
use tokio::io::ReadBuf;

/// File descriptor that is closed on drop.
#[derive(Debug)]
pub struct OwnedFd {
    fd: RawFd,
    close_on_drop: bool,
}

impl OwnedFd {
    /// # Safety
    /// `fd` must be a valid, open file descriptor this `OwnedFd` now owns.
    pub unsafe fn new(fd: RawFd) -> Self {
        Self { fd, close_on_drop: true }
    }
}

impl AsRawFd for OwnedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl IntoRawFd for OwnedFd {
    fn into_raw_fd(mut self) -> RawFd {
        self.close_on_drop = false;
        self.fd
    }
}

impl Drop for OwnedFd {
    fn drop(&mut self) {
        if self.close_on_drop {
            unsafe { libc::close(self.fd) };
        }
    }
}

/// A `sockaddr_un` for a filesystem path, built from `<socket-dir>/<peer>/<name>` (§6).
pub fn unix_addr(path: &Path) -> Result<sockaddr_un> {
    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.len() >= size_of::<sockaddr_un>() - size_of::<libc::sa_family_t>() {
        return Err(Error::new(ErrorKind::InvalidInput, "socket path too long"));
    }
    let mut addr: sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = AF_UNIX as _;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }
    Ok(addr)
}

/// Creates a non-blocking `SOCK_SEQPACKET` socket.
pub fn socket() -> Result<OwnedFd> {
    match unsafe { libc::socket(AF_UNIX, libc::SOCK_SEQPACKET | SOCK_NONBLOCK | SOCK_CLOEXEC, 0) } {
        -1 => Err(Error::last_os_error()),
        fd => Ok(unsafe { OwnedFd::new(fd) }),
    }
}

pub fn connect(socket: &OwnedFd, addr: &sockaddr_un) -> Result<()> {
    if unsafe { libc::connect(socket.as_raw_fd(), addr as *const _ as *const sockaddr, size_of::<sockaddr_un>() as socklen_t) } == 0 {
        Ok(())
    } else {
        Err(Error::last_os_error())
    }
}

pub fn send(socket: &OwnedFd, buf: &[u8]) -> Result<usize> {
    match unsafe { libc::send(socket.as_raw_fd(), buf.as_ptr() as *const _, buf.len(), 0) } {
        -1 => Err(Error::last_os_error()),
        n => Ok(n as usize),
    }
}

pub fn recv(socket: &OwnedFd, buf: &mut ReadBuf) -> Result<usize> {
    let unfilled = unsafe { buf.unfilled_mut() };
    match unsafe { libc::recv(socket.as_raw_fd(), unfilled.as_mut_ptr() as *mut _, unfilled.len(), 0) } {
        -1 => Err(Error::last_os_error()),
        n => {
            let n = n as usize;
            unsafe { buf.assume_init(n) };
            buf.advance(n);
            Ok(n)
        }
    }
}

pub fn getsockopt_error(socket: &OwnedFd) -> Result<c_int> {
    let mut optval: MaybeUninit<c_int> = MaybeUninit::uninit();
    let mut optlen: socklen_t = size_of::<c_int>() as _;
    if unsafe {
        libc::getsockopt(socket.as_raw_fd(), libc::SOL_SOCKET, libc::SO_ERROR, optval.as_mut_ptr() as *mut _, &mut optlen)
    } == -1
    {
        return Err(Error::last_os_error());
    }
    Ok(unsafe { optval.assume_init() })
}
