//! One accepted connection and the table handlers look it up through.
//!
//! A [`Peer`] is owned by exactly one connection task; everything mutable
//! about the connection (buffer, parser, socket halves) lives in that task,
//! not here. Handlers see peers as shared references resolved by id through
//! the endpoint's [`PeerRegistry`], so a handler holding on to a peer after
//! disconnection keeps a valid (if inert) object instead of a dangling one.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lifecycle of a connection, visible to handlers via [`Peer::phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerPhase {
    Connected = 0,
    AwaitingHeaders = 1,
    AwaitingBody = 2,
    Processing = 3,
    Closing = 4,
    Closed = 5,
}

impl PeerPhase {
    fn from_u8(value: u8) -> PeerPhase {
        match value {
            0 => PeerPhase::Connected,
            1 => PeerPhase::AwaitingHeaders,
            2 => PeerPhase::AwaitingBody,
            3 => PeerPhase::Processing,
            4 => PeerPhase::Closing,
            _ => PeerPhase::Closed,
        }
    }
}

/// Process-unique ids; never reused while the process lives.
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity and metadata of one accepted connection.
#[derive(Debug)]
pub struct Peer {
    id: u64,
    address: SocketAddr,
    phase: AtomicU8,
}

impl Peer {
    pub(crate) fn accept(address: SocketAddr) -> Arc<Peer> {
        Arc::new(Peer {
            id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            address,
            phase: AtomicU8::new(PeerPhase::Connected as u8),
        })
    }

    /// The connection's process-unique identifier. Handlers use this to
    /// track connection identity across `on_request`/`on_disconnection`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address of the connected client.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn phase(&self) -> PeerPhase {
        PeerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: PeerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{} ({})", self.id, self.address)
    }
}

/// Live peers keyed by id.
///
/// The registry holds the only shared references to peers; a
/// [`ResponseWriter`](crate::connection::ResponseWriter) resolves its peer
/// through here at call time rather than owning it.
#[derive(Debug, Default)]
pub(crate) struct PeerRegistry {
    peers: Mutex<HashMap<u64, Arc<Peer>>>,
}

impl PeerRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<Peer>>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn insert(&self, peer: Arc<Peer>) {
        self.lock().insert(peer.id(), peer);
    }

    pub(crate) fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub(crate) fn get(&self, id: u64) -> Option<Arc<Peer>> {
        self.lock().get(&id).map(Arc::clone)
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
