//! Error types shared across the server.
//!
//! Setup errors are fatal and bubble up to `main`. Protocol errors only ever
//! end the connection that produced them.

use std::io;
use thiserror::Error;

/// Failure while bringing up the listener, a worker, or its multiplexer.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),
    #[error("failed to set address reuse: {0}")]
    ReuseAddress(#[source] io::Error),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to set non-blocking mode: {0}")]
    NonBlocking(#[source] io::Error),
    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),
    #[error("failed to create poll instance: {0}")]
    Poll(#[source] io::Error),
    #[error("failed to register with poll: {0}")]
    Register(#[source] io::Error),
    #[error("poll wait failed: {0}")]
    Wait(#[source] io::Error),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker {0} panicked")]
    WorkerPanic(usize),
}

/// A malformed request. The offending connection is closed without a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid header length prefix")]
    InvalidLengthPrefix,
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    #[error("invalid CONTENT_LENGTH value")]
    InvalidContentLength,
}
