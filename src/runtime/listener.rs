//! Shared listening socket.
//!
//! One listener is created at startup and shared by every worker. Each worker
//! registers the raw descriptor with its own poll instance; the kernel hands
//! every pending connection to exactly one `accept` call, so workers never
//! see the same socket twice. Nothing balances load between them.

use crate::error::SetupError;
use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::os::unix::io::{AsRawFd, RawFd};
use thiserror::Error;

/// Result of a single accept attempt.
#[derive(Debug)]
pub enum Accept {
    /// A new connection, already in non-blocking mode.
    Connection(TcpStream, SocketAddr),
    /// No connection is pending right now.
    Idle,
}

/// A failed accept attempt. The listener itself stays usable.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// The accepted socket could not be configured and was dropped.
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("accept failed: {0}")]
    Io(#[source] io::Error),
}

/// The bound, listening, non-blocking server socket.
#[derive(Debug)]
pub struct Listener {
    inner: std::net::TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Listen on all interfaces at `port`.
    pub fn create(port: u16) -> Result<Self, SetupError> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Listen on `addr` with address reuse and the platform's maximum backlog.
    pub fn bind(addr: SocketAddr) -> Result<Self, SetupError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(SetupError::Socket)?;

        socket
            .set_reuse_address(true)
            .map_err(SetupError::ReuseAddress)?;
        socket
            .bind(&addr.into())
            .map_err(|source| SetupError::Bind { addr, source })?;
        socket.set_nonblocking(true).map_err(SetupError::NonBlocking)?;
        socket.listen(libc::SOMAXCONN).map_err(SetupError::Listen)?;

        let inner: std::net::TcpListener = socket.into();
        let local_addr = inner.local_addr().map_err(SetupError::Socket)?;

        Ok(Self { inner, local_addr })
    }

    /// The bound address, with the real port when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one pending connection, if any.
    ///
    /// Interrupted calls and connections aborted while still queued are
    /// skipped transparently.
    pub fn accept_one(&self) -> Result<Accept, AcceptError> {
        loop {
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true).map_err(SetupError::NonBlocking)?;
                    return Ok(Accept::Connection(TcpStream::from_std(stream), peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Accept::Idle),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(AcceptError::Io(e)),
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    fn accept_with_retry(listener: &Listener) -> (TcpStream, SocketAddr) {
        for _ in 0..200 {
            if let Accept::Connection(stream, peer) = listener.accept_one().unwrap() {
                return (stream, peer);
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no connection accepted");
    }

    #[test]
    fn test_bind_reports_real_port() {
        let listener = Listener::bind(loopback()).unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().ip().is_loopback());
    }

    #[test]
    fn test_accept_idle_when_nothing_pending() {
        let listener = Listener::bind(loopback()).unwrap();
        assert!(matches!(listener.accept_one().unwrap(), Accept::Idle));
    }

    #[test]
    fn test_accept_connection() {
        let listener = Listener::bind(loopback()).unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr()).unwrap();

        let (_stream, peer) = accept_with_retry(&listener);
        assert_eq!(peer, client.local_addr().unwrap());

        // Queue drained.
        assert!(matches!(listener.accept_one().unwrap(), Accept::Idle));
    }

    #[test]
    fn test_bind_conflict_is_setup_error() {
        let first = Listener::bind(loopback()).unwrap();
        let err = Listener::bind(first.local_addr()).unwrap_err();
        assert!(matches!(err, SetupError::Bind { .. }), "{err:?}");
    }
}
