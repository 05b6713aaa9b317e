use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::*;

use termgate_common::ClientId;

pub const MAX_CONNECTIONS: usize = 100;

/// Pool-facing view of a live terminal session. `teardown` cancels the
/// session's tasks and releases the SSH channel and transport; it must be
/// idempotent and must not touch the pool or the audit row. `close` is the
/// full shutdown: teardown plus the audit row update.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn teardown(&self);

    async fn close(&self) {
        self.teardown().await;
    }
}

struct Inner {
    sessions: HashMap<ClientId, Arc<dyn SessionHandle>>,
    order: VecDeque<ClientId>,
}

/// Process-wide registry of live sessions, bounded at `max_size` entries.
/// Insertion order doubles as eviction order; the mutex is never held across
/// teardown I/O.
pub struct ConnectionPool {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl ConnectionPool {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_size,
        }
    }

    /// Installs a session, evicting and fully tearing down the oldest entries
    /// while the pool is at capacity. Eviction skips the audit row update.
    pub async fn add(&self, client_id: ClientId, session: Arc<dyn SessionHandle>) {
        loop {
            let evicted = {
                let mut inner = self.inner.lock().await;
                if inner.sessions.len() < self.max_size {
                    inner.sessions.insert(client_id.clone(), session);
                    inner.order.push_back(client_id);
                    return;
                }
                let Some(oldest_id) = inner.order.pop_front() else {
                    // Capacity zero; nothing sane to do but drop the session.
                    return;
                };
                inner.sessions.remove(&oldest_id).map(|s| (oldest_id, s))
            };
            if let Some((oldest_id, oldest)) = evicted {
                warn!(client_id = %oldest_id, "Connection pool full, evicting oldest session");
                oldest.teardown().await;
            }
        }
    }

    pub async fn remove(&self, client_id: &str) -> Option<Arc<dyn SessionHandle>> {
        let mut inner = self.inner.lock().await;
        inner.order.retain(|id| id != client_id);
        inner.sessions.remove(client_id)
    }

    pub async fn get(&self, client_id: &str) -> Option<Arc<dyn SessionHandle>> {
        self.inner.lock().await.sessions.get(client_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, client_id: &str) -> bool {
        self.inner.lock().await.sessions.contains_key(client_id)
    }

    /// Empties the pool, returning every installed session. Used on server
    /// shutdown to drain sessions outside the lock.
    pub async fn drain(&self) -> Vec<(ClientId, Arc<dyn SessionHandle>)> {
        let mut inner = self.inner.lock().await;
        inner.order.clear();
        inner.sessions.drain().collect()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(MAX_CONNECTIONS)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct RecordingHandle {
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionHandle for RecordingHandle {
        async fn teardown(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle(teardowns: &Arc<AtomicUsize>) -> Arc<dyn SessionHandle> {
        Arc::new(RecordingHandle {
            teardowns: teardowns.clone(),
        })
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let pool = ConnectionPool::new(4);
        let teardowns = Arc::new(AtomicUsize::new(0));
        pool.add("a".into(), handle(&teardowns)).await;

        assert!(pool.get("a").await.is_some());
        assert!(pool.get("b").await.is_none());
        assert!(pool.remove("a").await.is_some());
        assert!(pool.remove("a").await.is_none());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_eviction_is_oldest_first() {
        let pool = ConnectionPool::new(2);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));

        pool.add("one".into(), handle(&first)).await;
        pool.add("two".into(), handle(&second)).await;
        pool.add("three".into(), handle(&third)).await;

        assert_eq!(pool.len().await, 2);
        assert!(!pool.contains("one").await);
        assert!(pool.contains("two").await);
        assert!(pool.contains("three").await);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_removal_updates_eviction_order() {
        let pool = ConnectionPool::new(2);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));

        pool.add("one".into(), handle(&first)).await;
        pool.add("two".into(), handle(&second)).await;
        pool.remove("one").await;
        pool.add("three".into(), handle(&third)).await;
        // "two" is now the oldest entry.
        pool.add("four".into(), handle(&first)).await;

        assert!(!pool.contains("two").await);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_returns_everything() {
        let pool = ConnectionPool::new(8);
        let teardowns = Arc::new(AtomicUsize::new(0));
        pool.add("a".into(), handle(&teardowns)).await;
        pool.add("b".into(), handle(&teardowns)).await;

        let drained = pool.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(pool.is_empty().await);
    }
}
