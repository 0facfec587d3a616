//! Directory of connected peers.
//!
//! DESIGN
//! ======
//! Maps a `PeerId` to the outbound queue of the connection that owns it.
//! Lookups for forwarding take the read lock and may run concurrently;
//! register/unregister take the write lock.
//!
//! The registry never writes to sockets. Each connection drains its own
//! queue, so frames forwarded to one destination by several senders are
//! written one at a time by the destination's task.
//!
//! Registration is first-write-wins: binding an identity that is already
//! owned by a live connection fails and leaves the existing entry intact.

use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use frames::PeerId;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Outbound queue of one connection. Holds raw frame text so forwarded
/// frames reach the destination exactly as the sender wrote them.
pub type Outbox = mpsc::Sender<Utf8Bytes>;

struct Binding {
    conn_id: Uuid,
    outbox: Outbox,
}

#[derive(Default)]
pub struct Registry {
    peers: RwLock<HashMap<PeerId, Binding>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `peer_id` to a connection. Returns `false` if the identity is
    /// already owned by another connection.
    pub async fn register(&self, peer_id: &str, conn_id: Uuid, outbox: Outbox) -> bool {
        let mut peers = self.peers.write().await;
        if peers.contains_key(peer_id) {
            return false;
        }
        peers.insert(peer_id.to_owned(), Binding { conn_id, outbox });
        true
    }

    /// Remove `peer_id` if it is still owned by `conn_id`.
    pub async fn unregister(&self, peer_id: &str, conn_id: Uuid) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get(peer_id) {
            Some(binding) if binding.conn_id == conn_id => {
                peers.remove(peer_id);
                true
            }
            _ => false,
        }
    }

    /// Outbound queue of the connection bound to `peer_id`.
    pub async fn lookup(&self, peer_id: &str) -> Option<Outbox> {
        let peers = self.peers.read().await;
        peers.get(peer_id).map(|binding| binding.outbox.clone())
    }

    /// Connection currently owning `peer_id`.
    pub async fn owner(&self, peer_id: &str) -> Option<Uuid> {
        let peers = self.peers.read().await;
        peers.get(peer_id).map(|binding| binding.conn_id)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
