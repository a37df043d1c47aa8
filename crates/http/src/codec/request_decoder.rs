//! Server-side request decoder.
//!
//! Drives the two-phase protocol state machine over the connection's read
//! buffer: head first, then body framing, emitting [`Message::Header`]
//! followed by [`Message::Payload`] items until [`PayloadItem::Eof`]. The
//! decoder then resets itself for the next request on a kept-alive
//! connection.
//!
//! The decoder also owns the request size ceiling: cumulative wire bytes of
//! the request being decoded (head plus body, including chunk framing) must
//! stay under `max_request_size`, and a `Content-Length` that alone exceeds
//! the ceiling fails fast before any body byte arrives. Size violations are
//! [`ParseError::RequestTooLarge`], a parse error distinct from any timeout.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::RequestHeadDecoder;
use crate::ensure;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHead};

pub struct RequestDecoder {
    head_decoder: RequestHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
    /// Wire bytes consumed by the request currently being decoded.
    request_bytes: usize,
    max_request_size: usize,
}

impl RequestDecoder {
    pub fn new(max_request_size: usize) -> Self {
        Self { head_decoder: RequestHeadDecoder, payload_decoder: None, request_bytes: 0, max_request_size }
    }

    fn track(&mut self, consumed: usize) -> Result<(), ParseError> {
        self.request_bytes += consumed;
        ensure!(
            self.request_bytes <= self.max_request_size,
            ParseError::request_too_large(self.request_bytes, self.max_request_size)
        );
        Ok(())
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // body phase
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let before = src.len();
            let decoded = payload_decoder.decode(src)?;
            self.track(before - src.len())?;

            let message = match decoded {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // request fully decoded, rearm for the next one
                    self.payload_decoder = None;
                    self.request_bytes = 0;
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        // head phase
        let before = src.len();
        let decoded = self.head_decoder.decode(src)?;
        let consumed = before - src.len();

        match decoded {
            Some((head, payload_size)) => {
                self.track(consumed)?;
                match payload_size {
                    PayloadSize::Empty => self.request_bytes = 0,
                    PayloadSize::Length(length) => {
                        let projected = self.request_bytes.saturating_add(usize::try_from(length).unwrap_or(usize::MAX));
                        ensure!(
                            projected <= self.max_request_size,
                            ParseError::request_too_large(projected, self.max_request_size)
                        );
                        self.payload_decoder = Some(PayloadDecoder::fixed_length(length));
                    }
                    PayloadSize::Chunked => self.payload_decoder = Some(PayloadDecoder::chunked()),
                }
                Ok(Some(Message::Header((head, payload_size))))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn decode_all(decoder: &mut RequestDecoder, buf: &mut BytesMut) -> Vec<Message<(RequestHead, PayloadSize)>> {
        let mut messages = Vec::new();
        while let Some(message) = decoder.decode(buf).unwrap() {
            let done = matches!(&message, Message::Payload(item) if item.is_eof());
            messages.push(message);
            if done {
                break;
            }
        }
        messages
    }

    #[test]
    fn request_with_content_length_body() {
        let str = indoc! {r##"
        POST /echo HTTP/1.1
        Host: localhost
        Content-Length: 5

        hello"##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new(1024);

        let messages = decode_all(&mut decoder, &mut buf);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].is_header());
        match &messages[1] {
            Message::Payload(item) => assert_eq!(&item.as_bytes().unwrap()[..], b"hello"),
            Message::Header(_) => panic!("expected payload"),
        }
        assert!(matches!(&messages[2], Message::Payload(item) if item.is_eof()));
    }

    #[test]
    fn bodyless_request_rearms_for_the_next_one() {
        let mut buf = BytesMut::from("GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n");
        let mut decoder = RequestDecoder::new(1024);

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        match first {
            Message::Header((head, payload_size)) => {
                assert_eq!(head.uri().path(), "/a");
                assert!(payload_size.is_empty());
            }
            Message::Payload(_) => panic!("expected header"),
        }

        let second = decoder.decode(&mut buf).unwrap().unwrap();
        match second {
            Message::Header((head, _)) => assert_eq!(head.uri().path(), "/b"),
            Message::Payload(_) => panic!("expected header"),
        }
    }

    #[test]
    fn declared_length_over_the_ceiling_fails_before_the_body() {
        let str = indoc! {r##"
        POST /upload HTTP/1.1
        Host: localhost
        Content-Length: 4096

        "##};

        let mut buf = BytesMut::from(str);
        let mut decoder = RequestDecoder::new(256);

        let result = decoder.decode(&mut buf);
        assert!(matches!(result, Err(ParseError::RequestTooLarge { .. })));
    }

    #[test]
    fn chunked_body_over_the_ceiling_fails_mid_stream() {
        let mut raw = b"POST /upload HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        for _ in 0..8 {
            raw.extend_from_slice(b"40\r\n");
            raw.extend_from_slice(&[b'A'; 0x40]);
            raw.extend_from_slice(b"\r\n");
        }
        raw.extend_from_slice(b"0\r\n\r\n");

        let mut buf = BytesMut::from(&raw[..]);
        let mut decoder = RequestDecoder::new(256);

        let result = loop {
            match decoder.decode(&mut buf) {
                Ok(Some(Message::Payload(item))) if item.is_eof() => break Ok(None),
                Ok(Some(_)) => {}
                other => break other,
            }
        };
        assert!(matches!(result, Err(ParseError::RequestTooLarge { .. })));
    }
}
