//! Response head decoder for the client role.
//!
//! Same shape as the request-side decoder: resumable over partial reads,
//! same header limits, produces a typed [`ResponseHead`] plus the body
//! framing selected by the status code and headers.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Response, StatusCode, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::header::header_decoder::{MAX_HEADER_BYTES, MAX_HEADER_NUM, is_chunked};
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, ResponseHead};

/// Decoder for HTTP response heads (status line plus headers).
pub struct ResponseHeadDecoder;

impl Decoder for ResponseHeadDecoder {
    type Item = (ResponseHead, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let (head, head_end) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
            let mut parsed = httparse::Response::new(&mut headers);

            let status = parsed.parse(src).map_err(|e| match e {
                httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
                e => ParseError::invalid_header(e.to_string()),
            })?;

            match status {
                Status::Complete(head_end) => {
                    trace!(head_size = head_end, "parsed response head");
                    ensure!(head_end <= MAX_HEADER_BYTES, ParseError::too_large_header(head_end, MAX_HEADER_BYTES));

                    let version = match parsed.version {
                        Some(0) => Version::HTTP_10,
                        Some(1) => Version::HTTP_11,
                        other => return Err(ParseError::InvalidVersion(other)),
                    };

                    let code = parsed.code.ok_or(ParseError::InvalidStatus)?;
                    let status_code = StatusCode::from_u16(code).map_err(|_| ParseError::InvalidStatus)?;

                    let mut builder = Response::builder().status(status_code).version(version);

                    let Some(header_map) = builder.headers_mut() else {
                        return Err(ParseError::invalid_header("malformed status line"));
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
                    (head, head_end)
                }
                Status::Partial => {
                    ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                    return Ok(None);
                }
            }
        };

        src.advance(head_end);

        let payload_size = response_payload(&head)?;
        Ok(Some((head, payload_size)))
    }
}

/// Body framing for a response, per RFC 9112 section 6.3.
///
/// 1xx, 204 and 304 responses never carry a body. Otherwise chunked wins
/// over content-length, and a response with neither is treated as bodyless
/// (close-delimited bodies are not supported by this client).
fn response_payload(head: &ResponseHead) -> Result<PayloadSize, ParseError> {
    let status = head.status();
    if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return Ok(PayloadSize::Empty);
    }

    let te_header = head.headers().get(http::header::TRANSFER_ENCODING);
    if is_chunked(te_header) {
        return Ok(PayloadSize::Chunked);
    }

    match head.headers().get(http::header::CONTENT_LENGTH) {
        None => Ok(PayloadSize::Empty),
        Some(cl_value) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;
            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
            if length == 0 {
                Ok(PayloadSize::Empty)
            } else {
                Ok(PayloadSize::Length(length))
            }
        }
    }
}
