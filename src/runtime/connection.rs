//! Connection state machine for a single accepted socket.
//!
//! A connection owns its socket, the request parser (and with it the receive
//! buffer), and the response once one has been rendered. The event loop hands
//! it the readiness bits of every notification; the connection drains what it
//! can and reports whether it should stay registered.

use crate::error::ProtocolError;
use crate::protocols::gateway::{self, RequestParser};
use bytes::Bytes;
use std::io::{self, Read, Write};

/// Bytes requested per `read` call while draining.
const READ_CHUNK_SIZE: usize = 4096;

/// Readiness reported by the multiplexer for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the socket is in an error state.
    pub hangup: bool,
}

#[cfg(test)]
impl Readiness {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
        hangup: false,
    };

    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
        hangup: false,
    };
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        Self {
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_read_closed() || event.is_error(),
        }
    }
}

/// Why a connection is being torn down.
#[derive(Debug)]
pub enum CloseReason {
    /// The whole response was written.
    Flushed,
    /// The peer hung up; nothing further was attempted.
    Hangup,
    /// End of stream before a complete request arrived.
    PeerClosed,
    /// The request was malformed.
    Protocol(ProtocolError),
    /// A read or write failed outright.
    Io(io::Error),
}

/// Result of handling one readiness notification.
#[derive(Debug)]
pub enum Outcome {
    KeepOpen,
    Done(CloseReason),
}

/// How a read drain stopped.
enum ReadEnd {
    WouldBlock,
    Eof,
    Failed(io::Error),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    parser: RequestParser,
    /// Rendered at most once, when the request completes.
    response: Option<Bytes>,
    write_cursor: usize,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            parser: RequestParser::new(),
            response: None,
            write_cursor: 0,
        }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    #[cfg(test)]
    pub(crate) fn parse_state(&self) -> &crate::protocols::gateway::ParseState {
        self.parser.state()
    }

    /// Bytes of the response written so far.
    pub fn written(&self) -> usize {
        self.write_cursor
    }

    /// Handle one readiness notification.
    ///
    /// Registrations are edge-triggered, so every readable notification
    /// drains the socket until it would block and every write attempt runs
    /// until the socket is full or the response is done.
    pub fn on_ready(&mut self, ready: Readiness) -> Outcome {
        if ready.hangup {
            return Outcome::Done(CloseReason::Hangup);
        }

        if ready.readable {
            let end = self.drain_reads();

            match self.parser.poll_request() {
                Ok(Some(request)) => {
                    if self.response.is_none() {
                        self.response = Some(gateway::render(&request));
                    }
                    if let Some(outcome) = self.flush_outcome() {
                        return outcome;
                    }
                }
                Ok(None) => {}
                Err(e) => return Outcome::Done(CloseReason::Protocol(e)),
            }

            match end {
                ReadEnd::WouldBlock => {}
                ReadEnd::Failed(e) => return Outcome::Done(CloseReason::Io(e)),
                // No more request bytes can arrive; only a pending response
                // keeps the connection worth holding.
                ReadEnd::Eof if self.response.is_none() => {
                    return Outcome::Done(CloseReason::PeerClosed)
                }
                ReadEnd::Eof => {}
            }
        }

        if ready.writable {
            if let Some(outcome) = self.flush_outcome() {
                return outcome;
            }
        }

        Outcome::KeepOpen
    }

    fn drain_reads(&mut self) -> ReadEnd {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return ReadEnd::Eof,
                Ok(n) => self.parser.extend(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return ReadEnd::WouldBlock,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadEnd::Failed(e),
            }
        }
    }

    fn flush_outcome(&mut self) -> Option<Outcome> {
        match self.flush() {
            Ok(true) => Some(Outcome::Done(CloseReason::Flushed)),
            Ok(false) => None,
            Err(e) => Some(Outcome::Done(CloseReason::Io(e))),
        }
    }

    /// Write as much of the response as the socket accepts.
    ///
    /// Returns `Ok(true)` once every byte has been written and `Ok(false)`
    /// while bytes remain (or no response exists yet).
    fn flush(&mut self) -> io::Result<bool> {
        let Some(response) = &self.response else {
            return Ok(false);
        };

        while self.write_cursor < response.len() {
            match self.stream.write(&response[self.write_cursor..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.write_cursor += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
