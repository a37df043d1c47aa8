//! Decoder for the chunked transfer coding
//! ([RFC 9112 section 7.1](https://www.rfc-editor.org/rfc/rfc9112.html#name-chunked-transfer-coding)).
//!
//! Each chunk is a hex size line (extensions ignored), the data, and a CRLF;
//! a zero-size chunk ends the body, optionally followed by trailer fields
//! that are read and discarded. The decoder is resumable at every byte.

use std::cmp;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    /// Bytes still owed by the chunk currently being read.
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating the hex chunk size.
    Size,
    /// Skipping a chunk extension up to its CRLF.
    Extension,
    /// Expecting the LF that ends the size line.
    SizeLf,
    /// Reading chunk data.
    Data,
    /// Expecting the CR after chunk data.
    DataCr,
    /// Expecting the LF after chunk data.
    DataLf,
    /// After the zero-size chunk: either the final CR or a trailer field.
    EndCr,
    /// Expecting the final LF.
    EndLf,
    /// Discarding a trailer field up to its CR.
    Trailer,
    /// Expecting the LF that ends a trailer field.
    TrailerLf,
    /// Message fully read.
    Complete,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, remaining: 0 }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == State::Complete {
                trace!("finished reading chunked body");
                return Ok(Some(PayloadItem::Eof));
            }

            if self.state == State::Data {
                if src.is_empty() {
                    return Ok(None);
                }
                // hand over whatever part of the chunk has arrived
                let len = cmp::min(self.remaining, src.len() as u64) as usize;
                let bytes = src.split_to(len).freeze();
                self.remaining -= bytes.len() as u64;
                if self.remaining == 0 {
                    self.state = State::DataCr;
                }
                trace!(len = bytes.len(), "read chunk bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }

            if src.is_empty() {
                return Ok(None);
            }
            self.state = self.step(src.get_u8())?;
        }
    }
}

impl ChunkedDecoder {
    /// Advances the framing machine by one byte. Chunk data is consumed in
    /// bulk by `decode`, never here.
    fn step(&mut self, byte: u8) -> Result<State, ParseError> {
        match (self.state, byte) {
            (State::Size, b @ (b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F')) => {
                let digit = match b {
                    b'0'..=b'9' => u64::from(b - b'0'),
                    b'a'..=b'f' => u64::from(b - b'a' + 10),
                    _ => u64::from(b - b'A' + 10),
                };
                self.remaining = self
                    .remaining
                    .checked_mul(16)
                    .and_then(|size| size.checked_add(digit))
                    .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))?;
                Ok(State::Size)
            }
            // linear whitespace and extensions both run until the size line's CRLF
            (State::Size, b' ' | b'\t' | b';') => Ok(State::Extension),
            (State::Size, b'\r') => Ok(State::SizeLf),
            (State::Size, _) => Err(ParseError::invalid_body("invalid chunk size line")),

            (State::Extension, b'\r') => Ok(State::SizeLf),
            (State::Extension, b'\n') => Err(ParseError::invalid_body("bare LF in chunk extension")),
            (State::Extension, _) => Ok(State::Extension),

            (State::SizeLf, b'\n') => {
                if self.remaining == 0 {
                    Ok(State::EndCr)
                } else {
                    Ok(State::Data)
                }
            }
            (State::SizeLf, _) => Err(ParseError::invalid_body("chunk size line missing LF")),

            (State::DataCr, b'\r') => Ok(State::DataLf),
            (State::DataCr, _) => Err(ParseError::invalid_body("chunk data missing CR")),

            (State::DataLf, b'\n') => Ok(State::Size),
            (State::DataLf, _) => Err(ParseError::invalid_body("chunk data missing LF")),

            (State::EndCr, b'\r') => Ok(State::EndLf),
            (State::EndCr, _) => Ok(State::Trailer),

            (State::EndLf, b'\n') => Ok(State::Complete),
            (State::EndLf, _) => Err(ParseError::invalid_body("chunked body missing final LF")),

            (State::Trailer, b'\r') => Ok(State::TrailerLf),
            (State::Trailer, _) => Ok(State::Trailer),

            (State::TrailerLf, b'\n') => Ok(State::EndCr),
            (State::TrailerLf, _) => Err(ParseError::invalid_body("trailer field missing LF")),

            (State::Data | State::Complete, _) => {
                // both handled before step is ever called
                Err(ParseError::invalid_body("chunked decoder state error"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn single_chunk_then_eof() {
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"1234567890abcdef"));

        let eof = decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(eof.is_eof());
    }

    #[test]
    fn multiple_chunks() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b", world"));

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn extensions_are_skipped() {
        let mut buffer = BytesMut::from(&b"5;chunk-ext=value\r\nhello\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn trailers_are_discarded() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n0\r\nTrailer: value\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn chunk_split_across_reads_resumes() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hel"));

        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"lo"));

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn invalid_size_line_is_rejected() {
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn missing_data_crlf_is_rejected() {
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        let chunk = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(chunk.as_bytes().unwrap(), &Bytes::from_static(b"hello"));

        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn zero_size_chunk_alone_is_eof() {
        let mut buffer = BytesMut::from(&b"0\r\n\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn oversized_chunk_size_overflows() {
        let mut buffer = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }
}
