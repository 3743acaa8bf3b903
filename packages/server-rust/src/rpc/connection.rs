//! Tracking of open RPC connections.
//!
//! Each accepted socket registers itself and holds a [`ConnectionGuard`];
//! dropping the guard removes the entry, so the registry stays accurate even
//! when a connection task panics or its thread unwinds.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Metadata of one open connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub connected_at: Instant,
    /// Generation of the server instance that accepted the connection.
    pub generation: u64,
    requests: AtomicU64,
}

impl ConnectionInfo {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Concurrent registry of open connections, shared by every server generation.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionInfo>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Connection IDs start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a connection; it stays listed until the guard is dropped.
    #[must_use]
    pub fn register(self: &Arc<Self>, peer: SocketAddr, generation: u64) -> ConnectionGuard {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = Arc::new(ConnectionInfo {
            id,
            peer,
            connected_at: Instant::now(),
            generation,
            requests: AtomicU64::new(0),
        });
        self.connections.insert(id, Arc::clone(&info));

        ConnectionGuard {
            registry: Arc::clone(self),
            info,
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Point-in-time snapshot, unordered.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionInfo>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a connection registered for as long as it lives.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    info: Arc<ConnectionInfo>,
}

impl ConnectionGuard {
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.connections.remove(&self.info.id);
    }
}
