//! Response head and completed-response types.

use bytes::Bytes;
use http::{HeaderMap, Response as HttpResponse, StatusCode, Version};

/// The head of an HTTP response before the body is attached, as produced by
/// the client-side decoder and consumed by the head serializer.
pub type ResponseHead = HttpResponse<()>;

/// A complete response as resolved by the client's request promise.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(head: ResponseHead, body: Bytes) -> Self {
        let (parts, ()) = head.into_parts();
        Self { status: parts.status, version: parts.version, headers: parts.headers, body }
    }

    pub fn code(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
