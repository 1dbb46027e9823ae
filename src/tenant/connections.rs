use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub type ConnectionId = u64;

/// Write side of a tenant connection. Boxed so the keep-alive dispatcher and
/// the framing loop share one type regardless of the transport.
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live client connection of a tenant.
///
/// Writes go through an async mutex so an echo and a keep-alive frame never
/// interleave on the wire.
pub struct TenantConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: tokio::sync::Mutex<ConnectionWriter>,
}

impl TenantConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Write a whole frame and flush it. Returns the number of bytes written.
    pub async fn send(&self, frame: &[u8]) -> std::io::Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(frame.len())
    }
}

/// The set of open connections of one tenant, keyed by a stable id.
///
/// The lock is scoped to the tenant and is never held across socket I/O:
/// callers take a snapshot and write outside the lock.
#[derive(Default)]
pub struct ConnectionSet {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Arc<TenantConnection>>>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<TenantConnection>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, peer_addr: SocketAddr, writer: ConnectionWriter) -> Arc<TenantConnection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = Arc::new(TenantConnection {
            id,
            peer_addr,
            writer: tokio::sync::Mutex::new(writer),
        });
        self.lock().insert(id, connection.clone());
        connection
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<TenantConnection>> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn snapshot(&self) -> Vec<Arc<TenantConnection>> {
        let mut connections: Vec<_> = self.lock().values().cloned().collect();
        connections.sort_by_key(|c| c.id());
        connections
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Removes a connection from its set when dropped, so every exit path of a
/// framing loop (including panics) leaves the set consistent.
pub struct ConnectionGuard<'a> {
    set: &'a ConnectionSet,
    id: ConnectionId,
}

impl<'a> ConnectionGuard<'a> {
    pub fn new(set: &'a ConnectionSet, id: ConnectionId) -> Self {
        Self { set, id }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        if self.set.remove(self.id).is_some() {
            tracing::trace!("Connection {} removed from tenant set", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let set = ConnectionSet::new();
        let a = set.register(peer(5001), Box::new(tokio::io::sink()));
        let b = set.register(peer(5002), Box::new(tokio::io::sink()));

        assert_ne!(a.id(), b.id());
        assert_eq!(set.len(), 2);

        set.remove(a.id());
        assert_eq!(set.len(), 1);
        assert!(!set.contains(a.id()));
        assert!(set.contains(b.id()));
    }

    #[tokio::test]
    async fn test_guard_removes_on_drop() {
        let set = ConnectionSet::new();
        let conn = set.register(peer(5001), Box::new(tokio::io::sink()));
        {
            let _guard = ConnectionGuard::new(&set, conn.id());
            assert_eq!(set.len(), 1);
        }
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_send_reports_bytes_written() {
        let set = ConnectionSet::new();
        let conn = set.register(peer(5001), Box::new(tokio::io::sink()));
        let written = conn.send(b"\x02ping\x03").await.unwrap();
        assert_eq!(written, 6);
    }
}
