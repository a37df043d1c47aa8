//! Client-side response decoder: the same two-phase state machine as
//! [`RequestDecoder`](crate::codec::RequestDecoder), run in response mode.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::ResponseHeadDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, ResponseHead};

pub struct ResponseDecoder {
    head_decoder: ResponseHeadDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self { head_decoder: ResponseHeadDecoder, payload_decoder: None }
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<(ResponseHead, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        let message = match self.head_decoder.decode(src)? {
            Some((head, payload_size)) => {
                if !payload_size.is_empty() {
                    self.payload_decoder = Some(PayloadDecoder::from(payload_size));
                }
                Some(Message::Header((head, payload_size)))
            }
            None => None,
        };

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn response_with_body_decodes_to_head_chunks_eof() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nPONG");
        let mut decoder = ResponseDecoder::new();

        match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Header((head, payload_size)) => {
                assert_eq!(head.status(), StatusCode::OK);
                assert_eq!(payload_size, PayloadSize::Length(4));
            }
            Message::Payload(_) => panic!("expected header"),
        }

        match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Payload(item) => assert_eq!(&item.as_bytes().unwrap()[..], b"PONG"),
            Message::Header(_) => panic!("expected payload"),
        }

        assert!(matches!(decoder.decode(&mut buf).unwrap().unwrap(), Message::Payload(item) if item.is_eof()));
    }

    #[test]
    fn chunked_response_decodes_through_the_chunk_machine() {
        let mut buf = BytesMut::from("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nPONG\r\n0\r\n\r\n");
        let mut decoder = ResponseDecoder::new();

        assert!(decoder.decode(&mut buf).unwrap().unwrap().is_header());

        match decoder.decode(&mut buf).unwrap().unwrap() {
            Message::Payload(item) => assert_eq!(&item.as_bytes().unwrap()[..], b"PONG"),
            Message::Header(_) => panic!("expected payload"),
        }

        assert!(matches!(decoder.decode(&mut buf).unwrap().unwrap(), Message::Payload(item) if item.is_eof()));
    }
}
