//! Experimental HTTP client.
//!
//! The client-side counterpart of the endpoint: it owns its own small
//! runtime, issues each request over a fresh connection, drives the shared
//! codec in response mode, and settles one [`Promise`] per request:
//! resolved with the parsed [`Response`], or rejected exactly once on
//! connect, parse, transport or timeout failure.
//!
//! ```no_run
//! use braid_http::client::{Client, ClientOptions};
//! use braid_async::{Barrier, when_all};
//! use std::time::Duration;
//!
//! let mut client = Client::new();
//! client.init(ClientOptions::default()).unwrap();
//!
//! let builder = client.get("localhost:8080/ping").timeout(Duration::from_secs(2));
//! let responses: Vec<_> = (0..3).map(|_| builder.send()).collect();
//!
//! let all = when_all(responses);
//! let _ = Barrier::new(all).wait_for(Duration::from_secs(5));
//! client.shutdown();
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use braid_async::{Promise, Rejection};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::codec::header::encode_request_head;
use crate::codec::{ResponseDecoder, collect_payload};
use crate::protocol::{HttpError, Message, ParseError, PayloadSize, Response, ResponseHead};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not initialized")]
    NotInitialized,

    #[error("client is already initialized")]
    AlreadyInitialized,

    #[error("invalid url: {reason}")]
    InvalidUrl { reason: String },

    #[error("unsupported scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("connect failed: {source}")]
    Connect { source: io::Error },

    #[error("transport error: {source}")]
    Transport { source: io::Error },

    #[error("client shut down before the response arrived")]
    ShutDown,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// Client configuration, captured at [`Client::init`] time.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    threads: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of I/O worker threads. Clamped to at least one.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }
}

struct ClientRuntime {
    runtime: Runtime,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// An HTTP client issuing promise-settled requests.
pub struct Client {
    running: Option<ClientRuntime>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("initialized", &self.running.is_some()).finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self { running: None }
    }

    pub fn init(&mut self, options: ClientOptions) -> Result<(), ClientError> {
        if self.running.is_some() {
            return Err(ClientError::AlreadyInitialized);
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.threads)
            .thread_name("braid-client")
            .enable_all()
            .build()?;
        self.running = Some(ClientRuntime { runtime, shutdown: CancellationToken::new(), tracker: TaskTracker::new() });
        Ok(())
    }

    pub fn get(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE, url)
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder<'_> {
        RequestBuilder {
            client: self,
            method,
            url: url.to_owned(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    /// Tears the client down. Requests still in flight reject with
    /// [`ClientError::ShutDown`]; promises that already settled are
    /// untouched. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(ClientRuntime { runtime, shutdown, tracker }) = self.running.take() else {
            return;
        };
        shutdown.cancel();
        tracker.close();
        let _ = runtime.block_on(async { tokio::time::timeout(Duration::from_secs(1), tracker.wait()).await });
        runtime.shutdown_timeout(Duration::from_millis(100));
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builds one request; [`send`](Self::send) may be called repeatedly to
/// issue it multiple times, each returning its own promise.
pub struct RequestBuilder<'c> {
    client: &'c Client,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    timeout: Option<Duration>,
}

impl fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RequestBuilder<'_> {
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Rejects the request's promise if no complete response arrived within
    /// `limit`. A zero duration means no deadline.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Issues the request and returns the promise of its response.
    pub fn send(&self) -> Promise<Response> {
        let Some(running) = &self.client.running else {
            return Promise::rejected(Rejection::new(ClientError::NotInitialized));
        };

        let target = match Target::parse(&self.url) {
            Ok(target) => target,
            Err(rejection) => return Promise::rejected(rejection),
        };
        let request_bytes = match serialize_request(&self.method, &target, &self.headers, &self.body) {
            Ok(bytes) => bytes,
            Err(rejection) => return Promise::rejected(rejection),
        };

        let (promise, completer) = Promise::pending();
        let limit = self.timeout;
        let shutdown = running.shutdown.clone();

        running.runtime.spawn(running.tracker.track_future(async move {
            let outcome = tokio::select! {
                () = shutdown.cancelled() => Err(Rejection::new(ClientError::ShutDown)),
                result = bounded_exchange(target, request_bytes, limit) => result,
            };
            match outcome {
                Ok(response) => {
                    completer.resolve(response);
                }
                Err(rejection) => {
                    completer.reject(rejection);
                }
            }
        }));

        promise
    }
}

/// Where a request goes: resolved host/port plus the origin-form target.
#[derive(Debug)]
struct Target {
    host: String,
    port: u16,
    authority: String,
    target: String,
}

impl Target {
    fn parse(raw: &str) -> Result<Target, Rejection> {
        // bare "host:port/path" is accepted and treated as http
        let with_scheme = if raw.contains("://") { raw.to_owned() } else { format!("http://{raw}") };
        let url = url::Url::parse(&with_scheme)
            .map_err(|e| Rejection::new(ClientError::InvalidUrl { reason: e.to_string() }))?;

        if url.scheme() != "http" {
            return Err(Rejection::new(ClientError::UnsupportedScheme { scheme: url.scheme().to_owned() }));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Rejection::new(ClientError::InvalidUrl { reason: "missing host".to_owned() }))?
            .to_owned();
        let port = url.port_or_known_default().unwrap_or(80);

        let mut target = url.path().to_owned();
        if target.is_empty() {
            target.push('/');
        }
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let authority = if port == 80 { host.clone() } else { format!("{host}:{port}") };
        Ok(Target { host, port, authority, target })
    }
}

fn serialize_request(method: &Method, target: &Target, headers: &HeaderMap, body: &Bytes) -> Result<Bytes, Rejection> {
    let mut headers = headers.clone();
    if !headers.contains_key(http::header::HOST) {
        let host = HeaderValue::from_str(&target.authority)
            .map_err(|e| Rejection::new(ClientError::InvalidUrl { reason: e.to_string() }))?;
        headers.insert(http::header::HOST, host);
    }
    if !body.is_empty() {
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }
    // one connection per request; ask the server to close when done
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));

    let mut dst = BytesMut::with_capacity(256 + body.len());
    encode_request_head(method, &target.target, &headers, &mut dst).map_err(Rejection::new)?;
    dst.extend_from_slice(body);
    Ok(dst.freeze())
}

async fn bounded_exchange(target: Target, request: Bytes, limit: Option<Duration>) -> Result<Response, Rejection> {
    match limit {
        Some(limit) if !limit.is_zero() => match tokio::time::timeout(limit, exchange(target, request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Rejection::new(HttpError::RequestTimeout { limit })),
        },
        _ => exchange(target, request).await,
    }
}

async fn exchange(target: Target, request: Bytes) -> Result<Response, Rejection> {
    let stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|e| Rejection::new(ClientError::Connect { source: e }))?;
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();

    write_half.write_all(&request).await.map_err(|e| Rejection::new(ClientError::Transport { source: e }))?;
    write_half.flush().await.map_err(|e| Rejection::new(ClientError::Transport { source: e }))?;

    let mut framed = FramedRead::with_capacity(read_half, ResponseDecoder::new(), 8 * 1024);

    // interim 1xx responses are read past, never surfaced
    let (head, payload_size) = loop {
        let decoded = next_response_head(&mut framed).await?;
        if !decoded.0.status().is_informational() {
            break decoded;
        }
        debug!(status = %decoded.0.status(), "skipping interim response");
    };

    let body = if payload_size.is_empty() {
        Bytes::new()
    } else {
        collect_payload(&mut framed).await.map_err(|e| Rejection::new(HttpError::from(e)))?
    };

    debug!(status = %head.status(), body_len = body.len(), "received response");
    Ok(Response::new(head, body))
}

async fn next_response_head(
    framed: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, ResponseDecoder>,
) -> Result<(ResponseHead, PayloadSize), Rejection> {
    match framed.next().await {
        None => Err(Rejection::new(ClientError::Transport { source: io::Error::from(io::ErrorKind::UnexpectedEof) })),
        Some(Ok(Message::Header(decoded))) => Ok(decoded),
        Some(Ok(Message::Payload(_))) => {
            Err(Rejection::new(HttpError::from(ParseError::invalid_body("payload before response head"))))
        }
        Some(Err(e)) => Err(Rejection::new(HttpError::from(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parses_bare_authority() {
        let target = Target::parse("localhost:9080").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, 9080);
        assert_eq!(target.authority, "localhost:9080");
        assert_eq!(target.target, "/");
    }

    #[test]
    fn target_keeps_path_and_query() {
        let target = Target::parse("localhost:9080/slow?x=1").unwrap();
        assert_eq!(target.target, "/slow?x=1");
    }

    #[test]
    fn target_defaults_http_port() {
        let target = Target::parse("http://example.test/ping").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.authority, "example.test");
    }

    #[test]
    fn https_is_refused() {
        let rejection = Target::parse("https://example.test/").unwrap_err();
        assert!(matches!(rejection.downcast_ref::<ClientError>(), Some(ClientError::UnsupportedScheme { .. })));
    }

    #[test]
    fn send_without_init_rejects() {
        let client = Client::new();
        let promise = client.get("localhost:1/ping").send();
        let settled = braid_async::Barrier::new(promise).wait_for(Duration::from_secs(1));
        match settled {
            braid_async::WaitOutcome::Rejected(rejection) => {
                assert!(matches!(rejection.downcast_ref::<ClientError>(), Some(ClientError::NotInitialized)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
