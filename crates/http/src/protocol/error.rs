use std::io;
use std::time::Duration;

use thiserror::Error;

/// Top-level error for a connection's lifetime.
///
/// Timeouts are deliberately separate variants: exceeding a size ceiling is
/// a parse error answered with a 4xx status, while a deadline expiring is
/// answered with `408 Request Timeout`.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    Request {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    Response {
        #[from]
        source: SendError,
    },

    #[error("headers not received within {limit:?}")]
    HeaderTimeout { limit: Duration },

    #[error("body not received within {limit:?}")]
    BodyTimeout { limit: Duration },

    #[error("no response within {limit:?}")]
    RequestTimeout { limit: Duration },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("request size exceed the limit, current: {current_size}, limit: {max_size}")]
    RequestTooLarge { current_size: usize, max_size: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid http status code")]
    InvalidStatus,

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn request_too_large(current_size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { current_size, max_size }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// Whether this error is a size-ceiling violation, answered with 413
    /// rather than the generic 400.
    pub fn is_size_limit(&self) -> bool {
        matches!(self, Self::TooLargeHeader { .. } | Self::RequestTooLarge { .. })
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("response already sent on this writer")]
    AlreadySent,

    #[error("response size exceed the limit, current: {current_size}, limit: {max_size}")]
    ResponseTooLarge { current_size: usize, max_size: usize },

    #[error("connection closed before response could be written")]
    ConnectionClosed,

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn response_too_large(current_size: usize, max_size: usize) -> Self {
        Self::ResponseTooLarge { current_size, max_size }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
