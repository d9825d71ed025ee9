//! Gateway protocol implementation.
//!
//! A CGI-style framing where the request declares its own sizes up front:
//!
//! ```text
//! Request:  <header-length>:<header-block><sep><content>
//!
//! header-block = ( key NUL value NUL )*      exactly header-length bytes
//! sep          = any single byte
//! content      = exactly CONTENT_LENGTH bytes
//!
//! Example:
//! 32:CONTENT_LENGTH\05\0REQUEST_URI\0/x\0,hello
//! ```
//!
//! `CONTENT_LENGTH` and `REQUEST_URI` are required. Every well-formed request
//! gets one templated response echoing the URI and content, padded with a
//! large filler payload, after which the connection is closed. Malformed
//! requests get no response at all.
//!
//! ## Incremental parsing
//!
//! Requests arrive in arbitrary fragments. `RequestParser` accumulates bytes
//! and advances through its states one step at a time, stopping as soon as a
//! step needs bytes that have not arrived yet. Positions inside the receive
//! buffer are kept as offsets; the finished frame is split off and frozen so
//! the returned `Request` owns its data independently of later reads.

pub mod parser;
pub mod response;

pub use parser::{ParseState, Request, RequestParser};
pub use response::render;
