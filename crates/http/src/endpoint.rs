//! The server endpoint: address binding, the I/O worker pool, and graceful
//! shutdown.
//!
//! An [`Endpoint`] owns a multi-threaded tokio runtime sized by
//! [`EndpointOptions::threads`]; the runtime's workers are the reactor that
//! multiplexes every peer socket. Each accepted connection is served by one
//! task pinned to its own socket (see
//! [`connection`](crate::connection)), so no peer state is ever touched by
//! two workers at once.
//!
//! ```no_run
//! use braid_http::endpoint::{Endpoint, EndpointOptions};
//! use braid_http::handler::make_handler;
//! use http::StatusCode;
//!
//! let mut server = Endpoint::new("127.0.0.1:0".parse().unwrap());
//! server.init(EndpointOptions::new().threads(3)).unwrap();
//! server.set_handler(make_handler(|_request, mut writer| {
//!     let _ = writer.send(StatusCode::OK, "Hello, World!");
//! }));
//! server.serve().unwrap();
//!
//! println!("listening on port {}", server.port().unwrap());
//! // ... later ...
//! server.shutdown();
//! ```

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Runtime;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::{ConnContext, Peer, PeerRegistry, serve_connection};
use crate::handler::Handler;

/// How long a graceful shutdown waits for in-flight connections to drain
/// before the runtime is torn down underneath them.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Immutable server configuration, captured when [`Endpoint::init`] is
/// called and never mutated while the endpoint is serving.
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    pub(crate) threads: usize,
    pub(crate) reuse_addr: bool,
    pub(crate) header_timeout: Duration,
    pub(crate) body_timeout: Duration,
    pub(crate) max_request_size: usize,
    pub(crate) max_response_size: usize,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            reuse_addr: true,
            header_timeout: Duration::from_secs(60),
            body_timeout: Duration::from_secs(60),
            max_request_size: 1024 * 1024,
            max_response_size: usize::MAX,
        }
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of I/O worker threads. Clamped to at least one.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Whether to set `SO_REUSEADDR` on the listening socket.
    pub fn reuse_addr(mut self, reuse_addr: bool) -> Self {
        self.reuse_addr = reuse_addr;
        self
    }

    /// Deadline for receiving a complete request head, measured from
    /// connection start and re-armed per request on kept-alive connections.
    pub fn header_timeout(mut self, header_timeout: Duration) -> Self {
        self.header_timeout = header_timeout;
        self
    }

    /// Deadline for receiving a complete request body, measured from when
    /// body parsing starts. Independent of the header deadline.
    pub fn body_timeout(mut self, body_timeout: Duration) -> Self {
        self.body_timeout = body_timeout;
        self
    }

    /// Ceiling on the wire size of one request, head plus body.
    pub fn max_request_size(mut self, max_request_size: usize) -> Self {
        self.max_request_size = max_request_size;
        self
    }

    /// Ceiling on the serialized size of one response.
    pub fn max_response_size(mut self, max_response_size: usize) -> Self {
        self.max_response_size = max_response_size;
        self
    }
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("no handler set before serve")]
    MissingHandler,

    #[error("endpoint is already serving")]
    AlreadyServing,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

struct Running {
    runtime: Runtime,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// An HTTP server bound to one address.
///
/// Lifecycle: [`new`](Self::new) → [`init`](Self::init) →
/// [`set_handler`](Self::set_handler) → [`serve`](Self::serve) →
/// [`shutdown`](Self::shutdown). Serving runs entirely on background
/// threads; `serve` returns as soon as the listener is bound, with the
/// actual port available from [`port`](Self::port). Shutdown is graceful
/// and idempotent, and a shut-down endpoint may be re-`init`ed and served
/// again with a fresh options snapshot.
pub struct Endpoint {
    address: SocketAddr,
    options: Arc<EndpointOptions>,
    handler: Option<Arc<dyn Handler>>,
    registry: Arc<PeerRegistry>,
    running: Option<Running>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("options", &self.options)
            .field("bound", &self.running.as_ref().map(|running| running.local_addr))
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            options: Arc::new(EndpointOptions::default()),
            handler: None,
            registry: Arc::new(PeerRegistry::default()),
            running: None,
        }
    }

    /// A fresh options builder, for symmetry with [`Endpoint::init`].
    pub fn options() -> EndpointOptions {
        EndpointOptions::new()
    }

    /// Captures the configuration snapshot this endpoint will serve with.
    ///
    /// Fails while the endpoint is serving; after a shutdown, re-`init`
    /// installs a fresh snapshot.
    pub fn init(&mut self, options: EndpointOptions) -> Result<(), EndpointError> {
        if self.running.is_some() {
            return Err(EndpointError::AlreadyServing);
        }
        self.options = Arc::new(options);
        Ok(())
    }

    pub fn set_handler(&mut self, handler: impl Handler) {
        self.handler = Some(Arc::new(handler));
    }

    /// Binds the address and starts serving on background worker threads.
    ///
    /// Must be called from outside any async runtime.
    pub fn serve(&mut self) -> Result<(), EndpointError> {
        if self.running.is_some() {
            return Err(EndpointError::AlreadyServing);
        }
        let handler = Arc::clone(self.handler.as_ref().ok_or(EndpointError::MissingHandler)?);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.options.threads)
            .thread_name("braid-io")
            .enable_all()
            .build()?;

        let listener = runtime.block_on(bind(self.address, self.options.reuse_addr))?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        info!(address = %local_addr, threads = self.options.threads, "endpoint serving");
        runtime.spawn(tracker.track_future(accept_loop(
            listener,
            handler,
            Arc::clone(&self.options),
            Arc::clone(&self.registry),
            shutdown.clone(),
            tracker.clone(),
        )));

        self.running = Some(Running { runtime, local_addr, shutdown, tracker });
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.running.is_some()
    }

    /// The actual bound address; with port 0 requested, this carries the
    /// ephemeral port the kernel picked.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Gracefully stops serving: no new connections are accepted, in-flight
    /// writes drain, every peer is closed, worker threads are joined and
    /// the listening socket is closed. Safe to call more than once.
    pub fn shutdown(&mut self) {
        let Some(Running { runtime, shutdown, tracker, .. }) = self.running.take() else {
            return;
        };
        info!("endpoint shutting down");
        shutdown.cancel();
        tracker.close();

        let drained = runtime.block_on(async { timeout(DRAIN_GRACE, tracker.wait()).await });
        if drained.is_err() {
            warn!("connections still draining at the grace deadline, forcing shutdown");
        }
        runtime.shutdown_timeout(Duration::from_secs(1));
        self.registry.clear();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn bind(address: SocketAddr, reuse_addr: bool) -> io::Result<TcpListener> {
    let socket = match address {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    if reuse_addr {
        socket.set_reuseaddr(true)?;
    }
    socket.bind(address)?;
    socket.listen(1024)
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    options: Arc<EndpointOptions>,
    registry: Arc<PeerRegistry>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let _ = stream.set_nodelay(true);
                    let peer = Peer::accept(remote);
                    registry.insert(Arc::clone(&peer));
                    debug!(%peer, "accepted connection");

                    let ctx = ConnContext {
                        handler: Arc::clone(&handler),
                        options: Arc::clone(&options),
                        registry: Arc::clone(&registry),
                        shutdown: shutdown.clone(),
                    };
                    tracker.spawn(serve_connection(stream, peer, ctx));
                }
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                }
            },
        }
    }
    debug!("accept loop stopped, listener closed");
}
