//! Per-client serialization of the budget read → decide → record section.
//!
//! Two requests for the same client must not both read the same consumed
//! total and both admit ads. Requests for different clients never contend.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created async mutex per client id. Entries are dropped again once
/// nobody holds or waits on them, so the map tracks only in-flight clients.
#[derive(Default)]
pub struct ClientLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held for the duration of one client's critical section.
pub struct ClientGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    client_id: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl ClientLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, client_id: &str) -> ClientGuard<'_> {
        let lock = self
            .locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ClientGuard {
            guard: Some(guard),
            client_id: client_id.to_string(),
            locks: &self.locks,
        }
    }

    /// Clients with a lock entry right now.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for ClientGuard<'_> {
    fn drop(&mut self) {
        // Release first so the strong count below only sees waiters.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.client_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = ClientLocks::new();
        {
            let _guard = locks.acquire("client-1").await;
            assert_eq!(locks.tracked(), 1);
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_distinct_clients_do_not_block() {
        let locks = ClientLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(200), locks.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_client_is_serialized() {
        let locks = Arc::new(ClientLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked(), 0);
    }
}
