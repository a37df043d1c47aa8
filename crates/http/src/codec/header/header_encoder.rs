//! Head serializers for both roles: response heads on the server side,
//! request heads on the client side.

use std::io;
use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use http::{HeaderMap, Method, Version};
use tracing::error;

use crate::protocol::{ResponseHead, SendError};

/// Initial buffer size reserved for head serialization
const INIT_HEAD_SIZE: usize = 4 * 1024;

/// Serializes a response head (status line plus headers) into `dst`.
///
/// The caller has already fixed up `Content-Length`, `Content-Encoding` and
/// `Connection` in the head's header map.
pub(crate) fn encode_response_head(head: &ResponseHead, dst: &mut BytesMut) -> Result<(), SendError> {
    dst.reserve(INIT_HEAD_SIZE);
    match head.version() {
        Version::HTTP_10 | Version::HTTP_11 => {
            let status = head.status();
            write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or("Unknown"))?;
        }
        v => {
            error!(http_version = ?v, "unsupported http version");
            return Err(io::Error::from(ErrorKind::Unsupported).into());
        }
    }

    put_headers(head.headers(), dst);
    Ok(())
}

/// Serializes a request head into `dst`. `target` is the origin-form request
/// target (path plus optional query).
pub(crate) fn encode_request_head(
    method: &Method,
    target: &str,
    headers: &HeaderMap,
    dst: &mut BytesMut,
) -> Result<(), SendError> {
    dst.reserve(INIT_HEAD_SIZE);
    write!(FastWrite(dst), "{} {} HTTP/1.1\r\n", method.as_str(), target)?;
    put_headers(headers, dst);
    Ok(())
}

fn put_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (header_name, header_value) in headers.iter() {
        dst.put_slice(header_name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(header_value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// Writer over `BytesMut` so `write!` can format straight into the buffer.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Response, StatusCode};

    #[test]
    fn response_head_is_serialized_with_crlf_framing() {
        let head = Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_LENGTH, 5)
            .body(())
            .unwrap();

        let mut dst = BytesMut::new();
        encode_response_head(&head, &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n");
    }

    #[test]
    fn request_head_includes_target_and_host() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::HOST, HeaderValue::from_static("localhost:8080"));

        let mut dst = BytesMut::new();
        encode_request_head(&Method::GET, "/ping?fast=1", &headers, &mut dst).unwrap();

        assert_eq!(&dst[..], b"GET /ping?fast=1 HTTP/1.1\r\nhost: localhost:8080\r\n\r\n");
    }
}
