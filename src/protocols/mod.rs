//! Protocol implementations.
//!
//! Each protocol exposes an incremental parser and a response builder that
//! the runtime drives from its connection handler.
//!
//! - `gateway`: length-prefixed, CGI-style request framing

pub mod gateway;
