//! Per-request response writer.
//!
//! A [`ResponseWriter`] is created fresh for every dispatched request and is
//! terminal: one `send` serializes the whole response and queues it on the
//! connection's write pump, which settles the returned promise once the
//! bytes have actually been flushed to the socket. Status code and
//! serialized size stay readable on the writer afterwards; everything else
//! about it is spent.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use braid_async::{Completer, Promise, Rejection};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, StatusCode};
use tokio::sync::mpsc;
use tracing::debug;

use crate::codec::header::encode_response_head;
use crate::connection::peer::{Peer, PeerRegistry};
use crate::protocol::{Encoding, ResponseHead, SendError, compress};

/// A unit of work for a connection's write pump.
pub(crate) enum WriteOrder {
    /// A handler response; the completer settles with the flushed byte
    /// count, or rejects if the connection dies first.
    Response { bytes: Bytes, completer: Completer<usize> },
    /// Control traffic (interim and synthesized responses) with no promise
    /// attached.
    Plain { bytes: Bytes },
}

pub(crate) type OrderSender = mpsc::UnboundedSender<WriteOrder>;
pub(crate) type OrderReceiver = mpsc::UnboundedReceiver<WriteOrder>;

/// The output sink handed to a handler for exactly one request.
pub struct ResponseWriter {
    peer_id: u64,
    registry: Arc<PeerRegistry>,
    orders: OrderSender,
    compression: Encoding,
    headers: HeaderMap,
    keep_alive: bool,
    max_response_size: usize,
    sent: Option<(StatusCode, usize)>,
    /// Shared with the connection task so it can tell whether the handler
    /// responded even if the writer was moved into a panicked closure.
    sent_flag: Arc<AtomicBool>,
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("peer_id", &self.peer_id)
            .field("compression", &self.compression)
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

impl ResponseWriter {
    pub(crate) fn new(
        peer_id: u64,
        registry: Arc<PeerRegistry>,
        orders: OrderSender,
        keep_alive: bool,
        max_response_size: usize,
        sent_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            peer_id,
            registry,
            orders,
            compression: Encoding::Identity,
            headers: HeaderMap::new(),
            keep_alive,
            max_response_size,
            sent: None,
            sent_flag,
        }
    }

    /// The peer this writer responds to, looked up by id.
    ///
    /// Returns `None` once the connection has been torn down.
    pub fn peer(&self) -> Option<Arc<Peer>> {
        self.registry.get(self.peer_id)
    }

    /// Opts the response body into `encoding`, typically the result of
    /// [`Request::best_accept_encoding`](crate::protocol::Request::best_accept_encoding).
    pub fn set_compression(&mut self, encoding: Encoding) {
        self.compression = encoding;
    }

    /// Extra headers to serialize with the response.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Status code of the response this writer sent, if any.
    pub fn response_code(&self) -> Option<StatusCode> {
        self.sent.map(|(code, _)| code)
    }

    /// Total serialized size in bytes (head plus body) of the response this
    /// writer sent, if any.
    pub fn response_size(&self) -> Option<usize> {
        self.sent.map(|(_, size)| size)
    }

    /// Serializes and queues the response, returning a promise that
    /// resolves with the flushed byte count or rejects if the connection
    /// closes mid-write.
    ///
    /// A writer can send once; a second call returns a promise already
    /// rejected with [`SendError::AlreadySent`].
    pub fn send(&mut self, status: StatusCode, body: impl Into<Bytes>) -> Promise<usize> {
        if self.sent.is_some() {
            return Promise::rejected(Rejection::new(SendError::AlreadySent));
        }

        let body = body.into();
        let (body, applied) = match self.compression {
            Encoding::Identity => (body, None),
            _ if body.is_empty() => (body, None),
            encoding => match compress(encoding, &body) {
                Ok(compressed) => (compressed, Some(encoding)),
                Err(e) => return Promise::rejected(Rejection::new(SendError::io(e))),
            },
        };

        let mut head = ResponseHead::new(());
        *head.status_mut() = status;
        *head.headers_mut() = std::mem::take(&mut self.headers);
        head.headers_mut().insert(http::header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        if let Some(encoding) = applied {
            head.headers_mut().insert(http::header::CONTENT_ENCODING, HeaderValue::from_static(encoding.name()));
        }
        if !self.keep_alive {
            head.headers_mut().insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        }

        let mut serialized = BytesMut::with_capacity(256 + body.len());
        if let Err(e) = encode_response_head(&head, &mut serialized) {
            return Promise::rejected(Rejection::new(e));
        }
        serialized.extend_from_slice(&body);

        let total = serialized.len();
        if total > self.max_response_size {
            return Promise::rejected(Rejection::new(SendError::response_too_large(total, self.max_response_size)));
        }

        self.sent = Some((status, total));
        self.sent_flag.store(true, Ordering::Release);
        debug!(peer_id = self.peer_id, status = %status, size = total, "queueing response");

        let (promise, completer) = Promise::pending();
        if self.orders.send(WriteOrder::Response { bytes: serialized.freeze(), completer: completer.clone() }).is_err() {
            completer.reject(Rejection::new(SendError::ConnectionClosed));
        }
        promise
    }
}

/// Serializes a minimal bodyless response, for control paths that bypass
/// the handler: timeouts, parse failures, handler faults.
pub(crate) fn plain_response(status: StatusCode, close: bool) -> Bytes {
    let mut head = ResponseHead::new(());
    *head.status_mut() = status;
    head.headers_mut().insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    if close {
        head.headers_mut().insert(http::header::CONNECTION, HeaderValue::from_static("close"));
    }

    let mut serialized = BytesMut::with_capacity(128);
    // a fixed status line and two fixed headers always serialize
    encode_response_head(&head, &mut serialized).expect("bodyless head serialization");
    serialized.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_async::{Barrier, WaitOutcome};
    use std::time::Duration;

    fn test_writer() -> (ResponseWriter, OrderReceiver) {
        let (orders, receiver) = mpsc::unbounded_channel();
        let writer =
            ResponseWriter::new(1, Arc::new(PeerRegistry::default()), orders, true, usize::MAX, Arc::new(AtomicBool::new(false)));
        (writer, receiver)
    }

    #[test]
    fn send_records_code_and_size() {
        let (mut writer, mut receiver) = test_writer();

        assert_eq!(writer.response_code(), None);
        let _promise = writer.send(StatusCode::OK, "Hello, World!");

        assert_eq!(writer.response_code(), Some(StatusCode::OK));
        let size = writer.response_size().unwrap();
        assert!(size > 13, "head plus body exceeds the body alone");
        assert!(size < 300, "short responses stay short");

        match receiver.try_recv().unwrap() {
            WriteOrder::Response { bytes, .. } => {
                assert_eq!(bytes.len(), size);
                assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\n"));
                assert!(bytes.ends_with(b"Hello, World!"));
            }
            WriteOrder::Plain { .. } => panic!("expected a response order"),
        }
    }

    #[test]
    fn second_send_rejects_with_invalid_state() {
        let (mut writer, _receiver) = test_writer();

        let _first = writer.send(StatusCode::OK, "once");
        let second = writer.send(StatusCode::OK, "twice");

        match Barrier::new(second).wait_for(Duration::from_secs(1)) {
            WaitOutcome::Rejected(rejection) => {
                assert!(matches!(rejection.downcast_ref::<SendError>(), Some(SendError::AlreadySent)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn send_over_response_ceiling_rejects() {
        let (orders, _receiver) = mpsc::unbounded_channel();
        let mut writer =
            ResponseWriter::new(1, Arc::new(PeerRegistry::default()), orders, true, 64, Arc::new(AtomicBool::new(false)));

        let promise = writer.send(StatusCode::OK, vec![b'x'; 1024]);
        match Barrier::new(promise).wait_for(Duration::from_secs(1)) {
            WaitOutcome::Rejected(rejection) => {
                assert!(matches!(rejection.downcast_ref::<SendError>(), Some(SendError::ResponseTooLarge { .. })));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn compressed_send_sets_content_encoding() {
        let (mut writer, mut receiver) = test_writer();
        writer.set_compression(Encoding::Gzip);

        let _promise = writer.send(StatusCode::OK, "a".repeat(2048));

        match receiver.try_recv().unwrap() {
            WriteOrder::Response { bytes, .. } => {
                let head_end = bytes.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
                let head = std::str::from_utf8(&bytes[..head_end]).unwrap().to_ascii_lowercase();
                assert!(head.contains("content-encoding: gzip"));
            }
            WriteOrder::Plain { .. } => panic!("expected a response order"),
        }
    }

    #[test]
    fn plain_response_is_a_complete_message() {
        let bytes = plain_response(StatusCode::REQUEST_TIMEOUT, true);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
        assert!(text.to_ascii_lowercase().contains("content-length: 0"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
