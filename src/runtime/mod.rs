//! Readiness-based runtime built on mio.
//!
//! - `Listener`: the shared, non-blocking listening socket
//! - `Worker`: one poll instance and its connections, one per thread
//! - `Connection`: per-socket buffers and the request/response state machine
//!
//! No async runtime is involved. Each worker thread blocks only in its poll
//! wait; every socket operation is non-blocking and drained until it would
//! block, since mio registrations are edge-triggered.

mod connection;
mod event_loop;
mod listener;

pub use connection::{CloseReason, Connection, Outcome, Readiness};
pub use event_loop::Worker;
pub use listener::{Accept, AcceptError, Listener};
