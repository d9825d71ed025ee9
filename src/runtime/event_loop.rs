//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Each worker owns its poll instance and a slab of the connections it
//! accepted. Connections never move between workers, so nothing here is
//! locked. The listening descriptor is the only thing registered with more
//! than one poll instance.

use super::connection::{CloseReason, Connection, Outcome, Readiness};
use super::listener::{Accept, AcceptError, Listener};
use crate::error::SetupError;
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Readiness events collected per poll wait.
const EVENT_BATCH_SIZE: usize = 256;

/// A single-threaded event loop serving its share of connections.
pub struct Worker {
    id: usize,
    poll: Poll,
    events: Events,
    listener: Arc<Listener>,
    connections: Slab<Connection<TcpStream>>,
}

impl Worker {
    /// Create the poll instance and register the shared listener with it.
    pub fn new(id: usize, listener: Arc<Listener>) -> Result<Self, SetupError> {
        let poll = Poll::new().map_err(SetupError::Poll)?;

        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)
            .map_err(SetupError::Register)?;

        Ok(Self {
            id,
            poll,
            events: Events::with_capacity(EVENT_BATCH_SIZE),
            listener,
            connections: Slab::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of connections this worker currently owns.
    #[cfg(test)]
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve forever. Only returns on a setup failure.
    pub fn run(mut self) -> Result<(), SetupError> {
        info!(worker = self.id, "Worker started");
        loop {
            self.turn(None)?;
        }
    }

    /// Wait once for readiness and dispatch every reported event.
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), SetupError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(SetupError::Wait(e)),
        }

        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(
                        self.id,
                        &self.listener,
                        &self.poll,
                        &mut self.connections,
                    )?;
                }
                Token(conn_id) => {
                    handle_connection_event(
                        self.id,
                        conn_id,
                        Readiness::from(event),
                        &self.poll,
                        &mut self.connections,
                    );
                }
            }
        }

        Ok(())
    }
}

fn accept_connections(
    worker: usize,
    listener: &Listener,
    poll: &Poll,
    connections: &mut Slab<Connection<TcpStream>>,
) -> Result<(), SetupError> {
    loop {
        match listener.accept_one() {
            Ok(Accept::Connection(stream, peer)) => {
                let entry = connections.vacant_entry();
                let conn_id = entry.key();
                let conn = entry.insert(Connection::new(stream));

                let registered = poll.registry().register(
                    conn.stream_mut(),
                    Token(conn_id),
                    Interest::READABLE | Interest::WRITABLE,
                );
                if let Err(e) = registered {
                    connections.remove(conn_id);
                    return Err(SetupError::Register(e));
                }

                debug!(worker, conn_id, peer = %peer, "Accepted connection");
            }
            Ok(Accept::Idle) => return Ok(()),
            Err(AcceptError::Setup(e)) => {
                warn!(worker, error = %e, "Dropped accepted connection");
            }
            Err(AcceptError::Io(e)) => {
                error!(worker, error = %e, "Accept error");
                return Ok(());
            }
        }
    }
}

fn handle_connection_event(
    worker: usize,
    conn_id: usize,
    ready: Readiness,
    poll: &Poll,
    connections: &mut Slab<Connection<TcpStream>>,
) {
    let Some(conn) = connections.get_mut(conn_id) else {
        return;
    };

    trace!(worker, conn_id, ?ready, "Connection event");

    if let Outcome::Done(reason) = conn.on_ready(ready) {
        close_connection(worker, poll, connections, conn_id, reason);
    }
}

fn close_connection(
    worker: usize,
    poll: &Poll,
    connections: &mut Slab<Connection<TcpStream>>,
    conn_id: usize,
    reason: CloseReason,
) {
    if let Some(mut conn) = connections.try_remove(conn_id) {
        let _ = poll.registry().deregister(conn.stream_mut());

        match &reason {
            CloseReason::Flushed => {
                debug!(worker, conn_id, written = conn.written(), "Response sent")
            }
            CloseReason::Protocol(e) => debug!(worker, conn_id, error = %e, "Protocol error"),
            CloseReason::Io(e) => debug!(worker, conn_id, error = %e, "Connection error"),
            CloseReason::Hangup | CloseReason::PeerClosed => {
                debug!(worker, conn_id, ?reason, "Peer closed connection")
            }
        }
        // Dropping the stream closes the socket.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::thread;

    const SAMPLE: &[u8] = b"32:CONTENT_LENGTH\x005\x00REQUEST_URI\x00/x\x00,hello";

    fn worker() -> (Worker, SocketAddr) {
        let listener = Listener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
        let addr = listener.local_addr();
        (Worker::new(0, Arc::new(listener)).unwrap(), addr)
    }

    /// Turn the worker until it has accepted a connection and released it.
    fn drive(worker: &mut Worker) {
        let mut accepted = false;
        for _ in 0..2000 {
            worker.turn(Some(Duration::from_millis(5))).unwrap();
            accepted |= worker.connection_count() > 0;
            if accepted && worker.connection_count() == 0 {
                return;
            }
        }
        panic!("worker did not finish");
    }

    #[test]
    fn test_worker_serves_request() {
        let (mut worker, addr) = worker();

        let client = thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            stream.write_all(SAMPLE).unwrap();
            let mut response = Vec::new();
            stream.read_to_end(&mut response).unwrap();
            response
        });

        drive(&mut worker);

        let response = client.join().unwrap();
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("Status: 200 OK\r\n"));
        assert!(text.contains("You requested URI: /x\r\n"));
        assert!(text.contains("Your request content was: hello\r\n"));
    }

    #[test]
    fn test_worker_drops_malformed_request() {
        let (mut worker, addr) = worker();

        let client = thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            stream.write_all(b"ab:garbage").unwrap();
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response);
            response
        });

        drive(&mut worker);
        assert!(client.join().unwrap().is_empty());
    }

    #[test]
    fn test_worker_keeps_incomplete_request_open() {
        let (mut worker, addr) = worker();

        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream.write_all(&SAMPLE[..10]).unwrap();

        for _ in 0..20 {
            worker.turn(Some(Duration::from_millis(5))).unwrap();
        }
        // No timeout exists: a stalled peer holds its connection.
        assert_eq!(worker.connection_count(), 1);

        stream.write_all(&SAMPLE[10..]).unwrap();
        let reader = thread::spawn(move || {
            let mut response = Vec::new();
            stream.read_to_end(&mut response).unwrap();
            response
        });

        for _ in 0..2000 {
            worker.turn(Some(Duration::from_millis(5))).unwrap();
            if worker.connection_count() == 0 {
                break;
            }
        }
        assert_eq!(worker.connection_count(), 0);
        assert!(!reader.join().unwrap().is_empty());
    }

    #[test]
    fn test_worker_releases_connection_on_hangup() {
        let (mut worker, addr) = worker();

        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream.write_all(&SAMPLE[..10]).unwrap();

        for _ in 0..2000 {
            worker.turn(Some(Duration::from_millis(5))).unwrap();
            if worker.connection_count() == 1 {
                break;
            }
        }
        assert_eq!(worker.connection_count(), 1);

        drop(stream);

        for _ in 0..2000 {
            worker.turn(Some(Duration::from_millis(5))).unwrap();
            if worker.connection_count() == 0 {
                break;
            }
        }
        assert_eq!(worker.connection_count(), 0);
    }
}
