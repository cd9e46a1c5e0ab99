//! Registry of live observer connections.
//!
//! Every event-stream connection registers here for its whole lifetime. The
//! returned [`ConnectionGuard`] deregisters on drop, so any way a connection
//! task ends (client gone, send error, shutdown, panic) removes it.
//! [`ConnectionRegistry::shutdown_all`] cancels every registered connection
//! and refuses new ones.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
#[error("server is shutting down")]
pub struct RegistryClosed;

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    connections: Mutex<HashMap<u64, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.inner
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection.
    pub fn register(&self) -> Result<ConnectionGuard, RegistryClosed> {
        let mut connections = self.connections();
        // Checked under the lock so shutdown_all cannot miss this connection.
        if self.inner.shutdown.is_cancelled() {
            return Err(RegistryClosed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        connections.insert(id, token.clone());
        Ok(ConnectionGuard {
            id,
            token,
            registry: self.clone(),
        })
    }

    fn deregister(&self, id: u64) {
        self.connections().remove(&id);
    }

    /// Live connections.
    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Terminate every registered connection and refuse new ones. Returns how
    /// many connections were live.
    pub fn shutdown_all(&self) -> usize {
        let connections = self.connections();
        self.inner.shutdown.cancel();
        connections.len()
    }
}

/// Membership of one connection; deregisters on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    token: CancellationToken,
    registry: ConnectionRegistry,
}

impl ConnectionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancelled when the server shuts down.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
