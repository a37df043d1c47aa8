//! The per-connection server loop.
//!
//! Each accepted connection runs exactly one copy of [`serve_connection`]:
//! it owns the read half, buffer and parser, enforces the header and body
//! deadlines, dispatches complete requests to the handler off the I/O
//! workers, and tears the peer down exactly once. A companion write pump
//! task owns the write half and is the only writer to the socket, so a slow
//! consumer stalls nothing but its own connection.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace};

use braid_async::Rejection;

use crate::codec::{RequestDecoder, collect_payload};
use crate::connection::peer::{Peer, PeerPhase, PeerRegistry};
use crate::connection::writer::{OrderReceiver, ResponseWriter, WriteOrder, plain_response};
use crate::endpoint::EndpointOptions;
use crate::handler::Handler;
use crate::protocol::{HttpError, Message, ParseError, PayloadSize, Request, RequestHead, SendError};

/// Initial capacity of a connection's read buffer.
const INIT_BUFFER_SIZE: usize = 8 * 1024;

type ServerFramed = FramedRead<OwnedReadHalf, RequestDecoder>;

/// Everything a connection task borrows from its endpoint.
pub(crate) struct ConnContext {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) options: Arc<EndpointOptions>,
    pub(crate) registry: Arc<PeerRegistry>,
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
}

/// Runs one connection from accept to teardown.
pub(crate) async fn serve_connection(stream: TcpStream, peer: Arc<Peer>, ctx: ConnContext) {
    let (read_half, write_half) = stream.into_split();
    let mut framed =
        FramedRead::with_capacity(read_half, RequestDecoder::new(ctx.options.max_request_size), INIT_BUFFER_SIZE);

    let (orders, order_receiver) = mpsc::unbounded_channel();
    let pump = tokio::spawn(write_pump(write_half, order_receiver));

    match run(&mut framed, &peer, &orders, &ctx).await {
        Ok(()) => debug!(%peer, "connection closed"),
        Err(e) => debug!(%peer, cause = %e, "connection closed on error"),
    }

    peer.set_phase(PeerPhase::Closing);

    // the pump drains queued writes once every order sender is gone
    drop(orders);
    let _ = pump.await;

    ctx.registry.remove(peer.id());
    let handler = Arc::clone(&ctx.handler);
    let disconnected = Arc::clone(&peer);
    let _ = tokio::task::spawn_blocking(move || handler.on_disconnection(&disconnected)).await;

    peer.set_phase(PeerPhase::Closed);
}

/// The request loop proper. Returning `Ok` means the peer went away or the
/// connection ran its course; `Err` means this side gave up on the
/// connection, with any error response already queued on the pump.
async fn run(
    framed: &mut ServerFramed,
    peer: &Arc<Peer>,
    orders: &mpsc::UnboundedSender<WriteOrder>,
    ctx: &ConnContext,
) -> Result<(), HttpError> {
    let header_deadline = ctx.options.header_timeout;
    let body_deadline = ctx.options.body_timeout;

    loop {
        peer.set_phase(PeerPhase::AwaitingHeaders);

        // the header deadline runs from connection start, and again from
        // the end of each response on a kept-alive connection
        let (head, payload_size) = tokio::select! {
            () = ctx.shutdown.cancelled() => return Ok(()),
            decoded = timeout(header_deadline, next_head(framed)) => match decoded {
                Err(_elapsed) => {
                    debug!(%peer, "header deadline expired, closing with 408");
                    let _ = orders.send(WriteOrder::Plain { bytes: plain_response(StatusCode::REQUEST_TIMEOUT, true) });
                    return Err(HttpError::HeaderTimeout { limit: header_deadline });
                }
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => {
                    let _ = orders.send(WriteOrder::Plain { bytes: plain_response(parse_error_status(&e), true) });
                    return Err(e.into());
                }
                Ok(Some(Ok(decoded))) => decoded,
            },
        };

        trace!(%peer, method = %head.method(), path = head.uri().path(), "parsed request head");
        let keep_alive = wants_keep_alive(&head);

        if expects_continue(&head) && !payload_size.is_empty() {
            let _ = orders.send(WriteOrder::Plain { bytes: Bytes::from_static(b"HTTP/1.1 100 Continue\r\n\r\n") });
            debug!(%peer, "sent interim continue response");
        }

        // the body deadline starts when body parsing starts, independent of
        // how much of the header deadline was used up
        let body = if payload_size.is_empty() {
            Bytes::new()
        } else {
            peer.set_phase(PeerPhase::AwaitingBody);
            match timeout(body_deadline, collect_payload(framed)).await {
                Err(_elapsed) => {
                    debug!(%peer, "body deadline expired, closing with 408");
                    let _ = orders.send(WriteOrder::Plain { bytes: plain_response(StatusCode::REQUEST_TIMEOUT, true) });
                    return Err(HttpError::BodyTimeout { limit: body_deadline });
                }
                Ok(Err(e)) => {
                    let _ = orders.send(WriteOrder::Plain { bytes: plain_response(parse_error_status(&e), true) });
                    return Err(e.into());
                }
                Ok(Ok(body)) => body,
            }
        };

        peer.set_phase(PeerPhase::Processing);
        let request = Request::new(head, body, peer.address());
        let sent_flag = Arc::new(AtomicBool::new(false));
        let writer = ResponseWriter::new(
            peer.id(),
            Arc::clone(&ctx.registry),
            orders.clone(),
            keep_alive,
            ctx.options.max_response_size,
            Arc::clone(&sent_flag),
        );

        // handlers are synchronous and may block; run them on the blocking
        // pool so the I/O workers keep multiplexing other peers
        let handler = Arc::clone(&ctx.handler);
        let dispatch = tokio::task::spawn_blocking(move || handler.on_request(&request, writer));
        if let Err(join_error) = dispatch.await {
            error!(%peer, cause = %join_error, "handler failed processing request");
            if !sent_flag.load(Ordering::Acquire) {
                let _ = orders.send(WriteOrder::Plain { bytes: plain_response(StatusCode::INTERNAL_SERVER_ERROR, true) });
            }
            return Ok(());
        }

        if !keep_alive {
            return Ok(());
        }
    }
}

async fn next_head(framed: &mut ServerFramed) -> Option<Result<(RequestHead, PayloadSize), ParseError>> {
    match framed.next().await {
        None => None,
        Some(Ok(Message::Header(decoded))) => Some(Ok(decoded)),
        Some(Ok(Message::Payload(_))) => Some(Err(ParseError::invalid_body("payload while awaiting request head"))),
        Some(Err(e)) => Some(Err(e)),
    }
}

fn parse_error_status(error: &ParseError) -> StatusCode {
    if error.is_size_limit() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn wants_keep_alive(head: &RequestHead) -> bool {
    let connection = head.headers().get(http::header::CONNECTION).and_then(|value| value.to_str().ok());
    match head.version() {
        http::Version::HTTP_10 => connection.is_some_and(|value| value.eq_ignore_ascii_case("keep-alive")),
        _ => !connection.is_some_and(|value| value.to_ascii_lowercase().contains("close")),
    }
}

fn expects_continue(head: &RequestHead) -> bool {
    head.headers()
        .get(http::header::EXPECT)
        .is_some_and(|value| value.as_bytes().len() >= 4 && &value.as_bytes()[..4] == b"100-")
}

/// The single writer to a connection's socket. Settles each response order's
/// promise only after the bytes are flushed; on transport failure, rejects
/// the failed order and everything queued behind it.
pub(crate) async fn write_pump(mut write_half: OwnedWriteHalf, mut orders: OrderReceiver) {
    while let Some(order) = orders.recv().await {
        match order {
            WriteOrder::Plain { bytes } => {
                if let Err(e) = write_flush(&mut write_half, &bytes).await {
                    debug!(cause = %e, "transport error on control write");
                    break;
                }
            }
            WriteOrder::Response { bytes, completer } => match write_flush(&mut write_half, &bytes).await {
                Ok(()) => {
                    completer.resolve(bytes.len());
                }
                Err(e) => {
                    completer.reject(Rejection::new(SendError::io(e)));
                    break;
                }
            },
        }
    }

    // transport is unusable (or the connection ended): fail what's left
    orders.close();
    while let Ok(order) = orders.try_recv() {
        if let WriteOrder::Response { completer, .. } = order {
            completer.reject(Rejection::new(SendError::ConnectionClosed));
        }
    }
    let _ = write_half.shutdown().await;
}

async fn write_flush(write_half: &mut OwnedWriteHalf, bytes: &[u8]) -> io::Result<()> {
    write_half.write_all(bytes).await?;
    write_half.flush().await
}
