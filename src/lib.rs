//! scgi-echo: a multi-threaded server for a length-prefixed gateway protocol.
//!
//! Requests use CGI-style framing (a decimal header length, a block of
//! NUL-separated headers, then the content). Every well-formed request is
//! answered with one templated response echoing its URI and content, after
//! which the connection closes.
//!
//! Features:
//! - One mio event loop per worker thread, all sharing one listening socket
//! - Incremental parsing across any number of partial reads
//! - Non-blocking, edge-triggered read and write draining
//! - Configuration via CLI arguments or a `KEY VALUE` file

pub mod config;
pub mod error;
pub mod protocols;
pub mod runtime;
pub mod server;

pub use config::Config;
pub use error::{ProtocolError, SetupError};
pub use server::Server;
