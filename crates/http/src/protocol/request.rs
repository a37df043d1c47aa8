//! Request head and completed-request types.
//!
//! [`RequestHead`] wraps `http::Request<()>` the way the parser produces it;
//! [`Request`] is the immutable, fully-received message handed to handlers
//! once the parser has marked it complete.

use std::net::SocketAddr;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Request as HttpRequest, Uri, Version};

use crate::protocol::Encoding;

/// The head of an HTTP request: method, target, version and headers.
#[derive(Debug)]
pub struct RequestHead {
    inner: HttpRequest<()>,
}

impl RequestHead {
    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Whether this request's method may carry a body at all.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT are treated as bodyless.
    pub fn may_have_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }
}

impl AsRef<HttpRequest<()>> for RequestHead {
    fn as_ref(&self) -> &HttpRequest<()> {
        &self.inner
    }
}

impl From<Parts> for RequestHead {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: HttpRequest::from_parts(parts, ()) }
    }
}

impl From<HttpRequest<()>> for RequestHead {
    #[inline]
    fn from(inner: HttpRequest<()>) -> Self {
        Self { inner }
    }
}

/// A complete request as seen by a [`Handler`](crate::handler::Handler).
///
/// Immutable once the parser marks it complete: handlers only read it.
#[derive(Debug)]
pub struct Request {
    head: RequestHead,
    body: Bytes,
    address: SocketAddr,
}

impl Request {
    pub(crate) fn new(head: RequestHead, body: Bytes, address: SocketAddr) -> Self {
        Self { head, body, address }
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    /// The request path, e.g. `/ping`.
    pub fn resource(&self) -> &str {
        self.head.uri().path()
    }

    pub fn query(&self) -> Option<&str> {
        self.head.uri().query()
    }

    pub fn version(&self) -> Version {
        self.head.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Remote address of the peer that sent this request.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The strongest response encoding this client accepts.
    ///
    /// Pass the result to
    /// [`ResponseWriter::set_compression`](crate::connection::ResponseWriter::set_compression)
    /// to opt the response into it.
    pub fn best_accept_encoding(&self) -> Encoding {
        Encoding::negotiate(self.headers())
    }
}
