//! Gateway response rendering.

use super::parser::Request;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the filler payload appended after the echoed fields.
pub const FILLER_LEN: usize = 1 << 16;

/// Byte repeated to form the filler payload.
pub const FILLER_BYTE: u8 = b'A';

const HEAD: &[u8] = b"Status: 200 OK\r\n\
Content-Type: application/octet-stream\r\n\
\r\n\
You requested URI: ";

const CONTENT_LABEL: &[u8] = b"\r\nYour request content was: ";

const TRAILER: &[u8] = b"\r\nGarbage to make the response larger\r\n";

/// Render the full response for a request.
///
/// The filler is large enough that the response rarely fits in a single
/// socket write, so it also exercises partial write handling.
pub fn render(request: &Request) -> Bytes {
    let len = HEAD.len()
        + request.uri.len()
        + CONTENT_LABEL.len()
        + request.content.len()
        + TRAILER.len()
        + FILLER_LEN;

    let mut out = BytesMut::with_capacity(len);
    out.put_slice(HEAD);
    out.put_slice(&request.uri);
    out.put_slice(CONTENT_LABEL);
    out.put_slice(&request.content);
    out.put_slice(TRAILER);
    out.put_bytes(FILLER_BYTE, FILLER_LEN);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &'static [u8], content: &'static [u8]) -> Request {
        Request {
            uri: Bytes::from_static(uri),
            content: Bytes::from_static(content),
        }
    }

    #[test]
    fn test_render_layout() {
        let response = render(&request(b"/x", b"hello"));

        let expected_head: &[u8] = b"Status: 200 OK\r\n\
Content-Type: application/octet-stream\r\n\
\r\n\
You requested URI: /x\r\n\
Your request content was: hello\r\n\
Garbage to make the response larger\r\n";

        assert_eq!(&response[..expected_head.len()], expected_head);
        assert_eq!(response.len(), expected_head.len() + FILLER_LEN);
        assert!(response[expected_head.len()..]
            .iter()
            .all(|&b| b == FILLER_BYTE));
    }

    #[test]
    fn test_render_binary_fields() {
        let response = render(&request(b"/\x00\xff", b"\r\n\x00"));
        let head_len = response.len() - FILLER_LEN;
        let head = &response[..head_len];

        assert!(head.windows(3).any(|w| w == b"/\x00\xff"));
        assert!(head.ends_with(b"\r\n\x00\r\nGarbage to make the response larger\r\n"));
    }

    #[test]
    fn test_render_empty_fields() {
        let response = render(&request(b"", b""));
        assert_eq!(
            response.len(),
            HEAD.len() + CONTENT_LABEL.len() + TRAILER.len() + FILLER_LEN
        );
    }
}
