//! Request head decoder.
//!
//! Parses the request line and header section out of the connection's read
//! buffer with `httparse`, producing a typed [`RequestHead`] plus the body
//! framing the headers select. The decoder is resumable: fed one byte at a
//! time it keeps answering "more data needed" until the final CRLF CRLF
//! arrives, without consuming anything from the buffer.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header section size: 8 KiB
//! - HTTP/1.0 and HTTP/1.1 only

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Request, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHead};

/// Maximum number of headers allowed in a request
pub(crate) const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
pub(crate) const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for HTTP request heads implementing the [`Decoder`] trait.
pub struct RequestHeadDecoder;

impl Decoder for RequestHeadDecoder {
    type Item = (RequestHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let (head, head_end) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
            let mut parsed = httparse::Request::new(&mut headers);

            let status = parsed.parse(src).map_err(|e| match e {
                httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
                e => ParseError::invalid_header(e.to_string()),
            })?;

            match status {
                Status::Complete(head_end) => {
                    trace!(head_size = head_end, "parsed request head");
                    ensure!(head_end <= MAX_HEADER_BYTES, ParseError::too_large_header(head_end, MAX_HEADER_BYTES));

                    let version = match parsed.version {
                        Some(0) => Version::HTTP_10,
                        Some(1) => Version::HTTP_11,
                        // HTTP/2 and HTTP/3 don't arrive over this wire format
                        other => return Err(ParseError::InvalidVersion(other)),
                    };

                    let mut builder = Request::builder()
                        .method(parsed.method.ok_or(ParseError::InvalidMethod)?)
                        .uri(parsed.path.ok_or(ParseError::InvalidUri)?)
                        .version(version);

                    let Some(header_map) = builder.headers_mut() else {
                        return Err(ParseError::invalid_header("malformed request line"));
                    };
                    header_map.reserve(parsed.headers.len());
                    for header in parsed.headers.iter() {
                        let name = HeaderName::from_bytes(header.name.as_bytes())
                            .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                        let value = HeaderValue::from_bytes(header.value)
                            .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                        header_map.append(name, value);
                    }

                    let head = builder.body(()).map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    (RequestHead::from(head), head_end)
                }
                Status::Partial => {
                    ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                    return Ok(None);
                }
            }
        };

        src.advance(head_end);

        let payload_size = parse_payload(&head)?;
        Ok(Some((head, payload_size)))
    }
}

/// Selects the body framing a request's headers call for, per RFC 9112
/// section 6: chunked transfer coding, a fixed content length, or no body.
///
/// A message carrying both `Transfer-Encoding` and `Content-Length` is
/// rejected outright.
fn parse_payload(head: &RequestHead) -> Result<PayloadSize, ParseError> {
    if !head.may_have_body() {
        return Ok(PayloadSize::Empty);
    }

    let te_header = head.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = head.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::Empty),

        (te_value @ Some(_), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;

            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(PayloadSize::Length(length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer-encoding and content-length both present")),
    }
}

/// Chunked applies only when it is the final transfer coding listed.
pub(crate) fn is_chunked(header_value: Option<&HeaderValue>) -> bool {
    const CHUNKED: &[u8] = b"chunked";
    if let Some(value) = header_value {
        if let Some(bytes) = value.as_bytes().rsplit(|b| *b == b',').next() {
            return bytes.trim_ascii() == CHUNKED;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};
    use indoc::indoc;

    #[test]
    fn check_is_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip, chunked".parse().unwrap());
        assert!(is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "chunked, gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));

        headers.insert("Transfer-Encoding", "gzip".parse().unwrap());
        assert!(!is_chunked(headers.get(http::header::TRANSFER_ENCODING)));
    }

    #[test]
    fn complete_head_is_consumed_up_to_the_body() {
        let str = indoc! {r##"
        POST /submit HTTP/1.1
        Host: 127.0.0.1:8080
        Content-Length: 3

        123"##};

        let mut buf = BytesMut::from(str);
        let (head, payload_size) = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();

        assert_eq!(head.method(), &Method::POST);
        assert_eq!(payload_size, PayloadSize::Length(3));
        assert_eq!(&buf[..], b"123");
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let mut buf = BytesMut::from(str);
        let (head, payload_size) = RequestHeadDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());
        assert_eq!(head.method(), &Method::GET);
        assert_eq!(head.version(), Version::HTTP_11);
        assert_eq!(head.uri().path(), "/index.html");
        assert_eq!(head.headers().len(), 3);
        assert_eq!(head.headers().get(http::header::HOST), Some(&HeaderValue::from_static("127.0.0.1:8080")));
        assert_eq!(head.headers().get(http::header::USER_AGENT), Some(&HeaderValue::from_static("curl/7.79.1")));
        assert_eq!(head.headers().get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
    }

    #[test]
    fn partial_head_is_left_untouched() {
        let mut buf = BytesMut::from("GET /index.html HTT");

        let result = RequestHeadDecoder.decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(&buf[..], b"GET /index.html HTT");
    }

    #[test]
    fn head_split_across_single_byte_feeds_still_parses() {
        let raw = b"GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let mut buf = BytesMut::new();

        let mut decoded = None;
        for byte in raw.iter() {
            buf.extend_from_slice(&[*byte]);
            if let Some(item) = RequestHeadDecoder.decode(&mut buf).unwrap() {
                decoded = Some(item);
            }
        }

        let (head, payload_size) = decoded.expect("head completes on the final byte");
        assert_eq!(head.uri().path(), "/ping");
        assert!(payload_size.is_empty());
    }

    #[test]
    fn both_framings_present_is_rejected() {
        let str = indoc! {r##"
        POST /submit HTTP/1.1
        Host: localhost
        Content-Length: 3
        Transfer-Encoding: chunked

        "##};

        let mut buf = BytesMut::from(str);
        let result = RequestHeadDecoder.decode(&mut buf);
        assert!(matches!(result, Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn garbage_request_line_is_rejected() {
        let mut buf = BytesMut::from("\x01\x02garbage\r\n\r\n");
        assert!(RequestHeadDecoder.decode(&mut buf).is_err());
    }
}
