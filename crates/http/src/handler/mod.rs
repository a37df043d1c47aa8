use std::sync::Arc;

use crate::connection::{Peer, ResponseWriter};
use crate::protocol::Request;

/// The application-side contract of the server.
///
/// `on_request` runs once per complete request, off the I/O workers, and
/// answers through the writer. `on_disconnection` runs once per connection
/// teardown, after which the peer's id is no longer writable.
pub trait Handler: Send + Sync + 'static {
    fn on_request(&self, request: &Request, writer: ResponseWriter);

    fn on_disconnection(&self, peer: &Arc<Peer>) {
        let _ = peer;
    }
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&Request, ResponseWriter) + Send + Sync + 'static,
{
    fn on_request(&self, request: &Request, writer: ResponseWriter) {
        (self.f)(request, writer)
    }
}

/// Wraps a plain function as a [`Handler`] with a no-op `on_disconnection`.
pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&Request, ResponseWriter) + Send + Sync + 'static,
{
    HandlerFn { f }
}
