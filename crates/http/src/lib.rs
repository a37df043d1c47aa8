//! An embeddable HTTP/1.1 server and client toolkit
//!
//! This crate owns all socket I/O, wire-protocol parsing, connection
//! lifecycle and timeout enforcement for an application that registers a
//! [`handler::Handler`] and binds an address. Results flow back through the
//! promise combinators of [`braid_async`] instead of raw callbacks: sending
//! a response yields a `Promise` of the flushed byte count, and the
//! experimental client yields a `Promise` per request.
//!
//! # Features
//!
//! - Full HTTP/1.1 request parsing: resumable request-line/header/body
//!   state machine, chunked and content-length framing, keep-alive,
//!   expect-continue
//! - A configurable pool of I/O worker threads multiplexing many peers,
//!   with each connection's state owned by exactly one task
//! - Independent header-read and body-read deadlines answered with
//!   `408 Request Timeout`
//! - Request/response size ceilings, distinct from timeouts
//! - Negotiated response compression (zstd, brotli, gzip, deflate)
//! - Graceful, idempotent shutdown that drains in-flight writes and leaks
//!   no descriptors
//! - An experimental promise-based client driving the same parser in
//!   response mode
//!
//! # Example
//!
//! ```no_run
//! use braid_http::endpoint::{Endpoint, EndpointOptions};
//! use braid_http::handler::make_handler;
//! use http::StatusCode;
//! use std::time::Duration;
//!
//! let mut server = Endpoint::new("127.0.0.1:8080".parse().unwrap());
//! server
//!     .init(
//!         EndpointOptions::new()
//!             .threads(4)
//!             .header_timeout(Duration::from_secs(2))
//!             .body_timeout(Duration::from_secs(4)),
//!     )
//!     .unwrap();
//!
//! server.set_handler(make_handler(|request, mut writer| {
//!     let encoding = request.best_accept_encoding();
//!     writer.set_compression(encoding);
//!     let _ = writer.send(StatusCode::OK, "Hello, World!");
//! }));
//!
//! server.serve().unwrap();
//! println!("listening on {}", server.local_addr().unwrap());
//! # server.shutdown();
//! ```
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - [`endpoint`]: address binding, the I/O worker pool, graceful shutdown
//! - [`connection`]: peer lifecycle, the per-connection loop, the
//!   per-request [`connection::ResponseWriter`]
//! - [`codec`]: the wire-protocol state machines for both roles
//! - [`protocol`]: message types, encoding negotiation, the error taxonomy
//! - [`handler`]: the application-side contract
//! - [`client`]: the experimental promise-based client
//! - [`files`]: the file-serving helper composed over the writer
//!
//! # Concurrency model
//!
//! A fixed pool of OS threads (sized at [`endpoint::Endpoint::init`] time)
//! runs the event loops. Peers stick to the task that accepted them; no
//! global lock serializes request handling. Handlers run on the blocking
//! pool, so they may block on a [`Barrier`](braid_async::Barrier), on
//! files, or on sleep without stalling any peer's I/O.
//!
//! # Limitations
//!
//! - HTTP/1.1 only (HTTP/2 and HTTP/3 are not supported)
//! - No TLS; terminate it in front of the endpoint
//! - Maximum header section: 8 KiB, maximum headers per message: 64

pub mod client;
pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod files;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
