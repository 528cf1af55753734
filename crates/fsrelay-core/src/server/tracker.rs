//! Active-connection accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts live connections. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection until the returned guard is dropped.
    pub fn enter(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Held by a connection task for its whole lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts() {
        let tracker = ConnectionTracker::new();
        let a = tracker.enter();
        let b = tracker.clone().enter();
        assert_eq!(tracker.active(), 2);
        drop(a);
        assert_eq!(tracker.active(), 1);
        drop(b);
        assert_eq!(tracker.active(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_guards() {
        let tracker = ConnectionTracker::new();
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    let _guard = tracker.enter();
                    tokio::task::yield_now().await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(tracker.active(), 0);
    }
}
