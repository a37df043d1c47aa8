//! Protocol types shared by the server and client roles.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: what the codecs emit.
//! - [`RequestHead`] / [`Request`]: the server-side view of a request,
//!   immutable once the parser marks it complete.
//! - [`ResponseHead`] / [`Response`]: the client-side view of a response.
//! - [`Encoding`]: content-encoding negotiation and the encoders behind it.
//! - [`HttpError`], [`ParseError`], [`SendError`]: the error taxonomy;
//!   timeouts, protocol violations and size-ceiling violations stay
//!   distinguishable all the way to the wire.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::Request;
pub use request::RequestHead;

mod response;
pub use response::Response;
pub use response::ResponseHead;

mod encoding;
pub use encoding::Encoding;
pub(crate) use encoding::compress;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
