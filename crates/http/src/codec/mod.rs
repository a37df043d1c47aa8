//! Protocol encoding and decoding.
//!
//! The decoders implement `tokio_util::codec::Decoder` and are driven by a
//! `FramedRead` over the connection's read half, which makes every one of
//! them resumable across arbitrarily fragmented reads:
//!
//! - [`RequestDecoder`]: server role, request head then body payload
//! - [`ResponseDecoder`]: client role, response head then body payload
//!
//! Head serialization is plain buffer writing (the complete message is
//! always in hand before anything is written), provided by the
//! head serializers in [`header`].

pub mod body;
pub mod header;

mod request_decoder;
mod response_decoder;

pub use request_decoder::RequestDecoder;
pub use response_decoder::ResponseDecoder;

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::protocol::{Message, ParseError, PayloadItem};

/// Drains a decoded message stream's payload items into one buffer,
/// returning the complete body at [`PayloadItem::Eof`].
///
/// The stream closing before EOF is a transport error: the peer went away
/// mid-body.
pub(crate) async fn collect_payload<T, S>(framed: &mut S) -> Result<Bytes, ParseError>
where
    S: Stream<Item = Result<Message<T>, ParseError>> + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        match framed.next().await {
            None => return Err(ParseError::io(io::Error::from(io::ErrorKind::UnexpectedEof))),
            Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => body.extend_from_slice(&bytes),
            Some(Ok(Message::Payload(PayloadItem::Eof))) => return Ok(body.freeze()),
            Some(Ok(Message::Header(_))) => return Err(ParseError::invalid_body("header while awaiting body")),
            Some(Err(e)) => return Err(e),
        }
    }
}
