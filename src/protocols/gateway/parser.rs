//! Gateway request parser.

use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};
use std::ops::Range;

/// Header naming the byte length of the content block.
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";

/// Header naming the requested URI.
pub const REQUEST_URI: &str = "REQUEST_URI";

const PREFIX_DELIMITER: u8 = b':';

/// A fully received request.
///
/// Both fields are slices of the frozen request frame, so they stay valid no
/// matter what happens to the receive buffer afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub uri: Bytes,
    pub content: Bytes,
}

/// Where the parser is within the current request.
///
/// Ranges are offsets into the receive buffer, never borrowed views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseState {
    /// Scanning for the `:` that ends the header length prefix.
    AwaitingLengthPrefix,
    /// Waiting for the full header block and its separator byte.
    AwaitingHeaderBlock {
        /// Bytes taken by the decimal prefix (delimiter excluded).
        prefix_len: usize,
        /// Declared header block length.
        header_len: usize,
    },
    /// Headers parsed, waiting for the content block.
    AwaitingContent {
        header: Range<usize>,
        uri: Range<usize>,
        content_len: usize,
    },
    /// The request was handed out; nothing more to parse.
    ResponseReady,
    /// The request was malformed. Sticky.
    Failed(ProtocolError),
}

/// Outcome of a single state transition attempt.
enum Step {
    Advanced,
    Blocked,
    Complete(Request),
}

/// Incremental parser owning the connection's receive buffer.
#[derive(Debug)]
pub struct RequestParser {
    buffer: BytesMut,
    state: ParseState,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            state: ParseState::AwaitingLengthPrefix,
        }
    }

    /// Append freshly read bytes to the receive buffer.
    ///
    /// Once the request has been handed out or rejected, further bytes are
    /// discarded instead of buffered.
    pub fn extend(&mut self, data: &[u8]) {
        if self.accepts_input() {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Whether the current request is still being received.
    pub fn accepts_input(&self) -> bool {
        !matches!(
            self.state,
            ParseState::ResponseReady | ParseState::Failed(_)
        )
    }

    /// Number of bytes currently held in the receive buffer.
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn state(&self) -> &ParseState {
        &self.state
    }

    /// Advance as far as the buffered bytes allow.
    ///
    /// Returns `Ok(Some(request))` exactly once, on the call that completes
    /// the request. Later calls return `Ok(None)`. Once a protocol error has
    /// been reported, every later call reports it again.
    pub fn poll_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        loop {
            match self.step() {
                Ok(Step::Advanced) => continue,
                Ok(Step::Blocked) => return Ok(None),
                Ok(Step::Complete(request)) => return Ok(Some(request)),
                Err(e) => {
                    self.state = ParseState::Failed(e.clone());
                    self.buffer = BytesMut::new();
                    return Err(e);
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step, ProtocolError> {
        match self.state.clone() {
            ParseState::AwaitingLengthPrefix => {
                let Some(prefix_len) = self.buffer.iter().position(|&b| b == PREFIX_DELIMITER)
                else {
                    return Ok(Step::Blocked);
                };

                let header_len = parse_decimal(&self.buffer[..prefix_len])
                    .ok_or(ProtocolError::InvalidLengthPrefix)?;

                self.state = ParseState::AwaitingHeaderBlock {
                    prefix_len,
                    header_len,
                };
                Ok(Step::Advanced)
            }

            ParseState::AwaitingHeaderBlock {
                prefix_len,
                header_len,
            } => {
                let start = prefix_len + 1;
                let end = start
                    .checked_add(header_len)
                    .ok_or(ProtocolError::InvalidLengthPrefix)?;

                // header block plus the one-byte separator
                if self.buffer.len() <= end {
                    return Ok(Step::Blocked);
                }

                let block = &self.buffer[start..end];

                let length_value = find_header(block, CONTENT_LENGTH)
                    .ok_or(ProtocolError::MissingHeader(CONTENT_LENGTH))?;
                let content_len = parse_decimal(&block[length_value])
                    .ok_or(ProtocolError::InvalidContentLength)?;

                let uri = find_header(block, REQUEST_URI)
                    .ok_or(ProtocolError::MissingHeader(REQUEST_URI))?;

                self.state = ParseState::AwaitingContent {
                    header: start..end,
                    uri: start + uri.start..start + uri.end,
                    content_len,
                };
                Ok(Step::Advanced)
            }

            ParseState::AwaitingContent {
                header,
                uri,
                content_len,
            } => {
                let content_start = header.end + 1;
                let frame_end = content_start
                    .checked_add(content_len)
                    .ok_or(ProtocolError::InvalidContentLength)?;

                if self.buffer.len() < frame_end {
                    return Ok(Step::Blocked);
                }

                let frame = self.buffer.split_to(frame_end).freeze();
                // Bytes past the frame are ignored.
                self.buffer = BytesMut::new();
                let request = Request {
                    uri: frame.slice(uri),
                    content: frame.slice(content_start..frame_end),
                };

                self.state = ParseState::ResponseReady;
                Ok(Step::Complete(request))
            }

            ParseState::ResponseReady => Ok(Step::Blocked),

            ParseState::Failed(e) => Err(e),
        }
    }
}

/// Parse a non-empty run of ASCII digits into a `usize`.
///
/// Signs, whitespace, and values that overflow are rejected.
fn parse_decimal(digits: &[u8]) -> Option<usize> {
    if digits.is_empty() {
        return None;
    }
    digits.iter().try_fold(0usize, |acc, &b| {
        if !b.is_ascii_digit() {
            return None;
        }
        acc.checked_mul(10)?.checked_add(usize::from(b - b'0'))
    })
}

/// Find the value range of `key` within a `key\0value\0...` header block.
///
/// The first complete pair wins. A trailing pair missing its terminator is
/// not considered.
fn find_header(block: &[u8], key: &str) -> Option<Range<usize>> {
    let mut pos = 0;
    while pos < block.len() {
        let key_end = pos + block[pos..].iter().position(|&b| b == 0)?;
        let value_start = key_end + 1;
        let value_end = value_start + block[value_start..].iter().position(|&b| b == 0)?;

        if &block[pos..key_end] == key.as_bytes() {
            return Some(value_start..value_end);
        }
        pos = value_end + 1;
    }
    None
}
