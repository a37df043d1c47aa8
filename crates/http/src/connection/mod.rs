//! Connection lifecycle: peers, the per-connection server loop, and the
//! per-request response writer.

mod peer;
pub use peer::Peer;
pub use peer::PeerPhase;
pub(crate) use peer::PeerRegistry;

mod writer;
pub use writer::ResponseWriter;

mod conn;
pub(crate) use conn::{ConnContext, serve_connection};
