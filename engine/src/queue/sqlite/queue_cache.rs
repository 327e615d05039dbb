//! Process-wide cache of registered queues.
//!
//! Purely an optimization: a hit lets a batch skip the registration upsert.
//! An empty cache is always correct, only slower.

use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::queue::types::{queue_name, QueueName};

/// Shared set of `(queue_type, queue)` pairs known to exist in `queues`.
///
/// Keyed by the pair rather than the bare name so that a cached queue can
/// never hide a registration under a different type.
#[derive(Debug, Default)]
pub struct QueueRegistrationCache {
    registered: RwLock<FxHashSet<(QueueName, QueueName)>>,
}

impl QueueRegistrationCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, queue_type: &str, queue: &str) -> bool {
        self.registered
            .read()
            .contains(&(queue_name(queue_type), queue_name(queue)))
    }

    /// Record a pair as registered. Returns false if it was already known.
    pub fn mark(&self, queue_type: &str, queue: &str) -> bool {
        let inserted = self
            .registered
            .write()
            .insert((queue_name(queue_type), queue_name(queue)));
        if inserted {
            debug!(queue_type, queue, "Queue registration cached");
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.registered.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.read().is_empty()
    }

    /// Forget everything (e.g. after the schema was reset underneath us).
    pub fn clear(&self) {
        self.registered.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mark_and_contains() {
        let cache = QueueRegistrationCache::new();
        assert!(cache.is_empty());
        assert!(!cache.contains("sqlite", "default"));

        assert!(cache.mark("sqlite", "default"));
        assert!(!cache.mark("sqlite", "default"));
        assert!(cache.contains("sqlite", "default"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_name_other_type_is_a_miss() {
        let cache = QueueRegistrationCache::new();
        cache.mark("sqlite", "default");
        assert!(!cache.contains("remote", "default"));
    }

    #[test]
    fn test_clear() {
        let cache = QueueRegistrationCache::new();
        cache.mark("sqlite", "a");
        cache.mark("sqlite", "b");
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_marks_are_idempotent() {
        let cache = Arc::new(QueueRegistrationCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..50 {
                        cache.mark("sqlite", &format!("queue-{}", i));
                        assert!(cache.contains("sqlite", &format!("queue-{}", i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }
        assert_eq!(cache.len(), 50);
    }
}
