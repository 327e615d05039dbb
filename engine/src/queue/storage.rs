//! Queue storage abstraction.
//!
//! The write layer never decides where an enqueued job id physically lands.
//! It resolves a [`JobQueue`] provider per queue name and delegates to it,
//! after making sure the `(type, name)` pair is registered.

use std::fmt;
use std::sync::Arc;

use rusqlite::Connection;
use rustc_hash::FxHashMap;

use super::types::{queue_name, QueueName};

/// Queue storage service.
///
/// `enqueue` runs inside the batch's atomic unit on the batch connection, so
/// a failure here aborts the whole batch.
pub trait JobQueue: Send + Sync {
    /// Identifier recorded in the `queues` table next to each queue name.
    fn queue_type(&self) -> &str;

    /// Place a job id on the named queue.
    fn enqueue(&self, conn: &Connection, queue: &str, job_id: u64) -> Result<(), rusqlite::Error>;
}

/// Maps queue names to their storage providers.
///
/// Queues without an explicit mapping use the default provider.
#[derive(Clone)]
pub struct QueueProviders {
    default: Arc<dyn JobQueue>,
    by_queue: FxHashMap<QueueName, Arc<dyn JobQueue>>,
}

impl QueueProviders {
    pub fn new(default: Arc<dyn JobQueue>) -> Self {
        Self {
            default,
            by_queue: FxHashMap::default(),
        }
    }

    /// Route the given queues to `provider`. Later calls override earlier ones.
    pub fn add<'a>(
        &mut self,
        provider: Arc<dyn JobQueue>,
        queues: impl IntoIterator<Item = &'a str>,
    ) {
        for queue in queues {
            self.by_queue.insert(queue_name(queue), Arc::clone(&provider));
        }
    }

    /// Builder form of [`QueueProviders::add`].
    pub fn with<'a>(
        mut self,
        provider: Arc<dyn JobQueue>,
        queues: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.add(provider, queues);
        self
    }

    pub fn get(&self, queue: &str) -> &Arc<dyn JobQueue> {
        self.by_queue.get(queue).unwrap_or(&self.default)
    }

    pub fn default_provider(&self) -> &Arc<dyn JobQueue> {
        &self.default
    }
}

impl fmt::Debug for QueueProviders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<(&str, &str)> = self
            .by_queue
            .iter()
            .map(|(queue, provider)| (queue.as_str(), provider.queue_type()))
            .collect();
        routes.sort_unstable();
        f.debug_struct("QueueProviders")
            .field("default", &self.default.queue_type())
            .field("routes", &routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedQueue(&'static str);

    impl JobQueue for NamedQueue {
        fn queue_type(&self) -> &str {
            self.0
        }

        fn enqueue(
            &self,
            _conn: &Connection,
            _queue: &str,
            _job_id: u64,
        ) -> Result<(), rusqlite::Error> {
            Ok(())
        }
    }

    #[test]
    fn test_unmapped_queue_uses_default() {
        let providers = QueueProviders::new(Arc::new(NamedQueue("sqlite")));
        assert_eq!(providers.get("default").queue_type(), "sqlite");
        assert_eq!(providers.get("anything").queue_type(), "sqlite");
    }

    #[test]
    fn test_mapped_queue_uses_override() {
        let providers = QueueProviders::new(Arc::new(NamedQueue("sqlite")))
            .with(Arc::new(NamedQueue("remote")), ["critical", "emails"]);
        assert_eq!(providers.get("critical").queue_type(), "remote");
        assert_eq!(providers.get("emails").queue_type(), "remote");
        assert_eq!(providers.get("default").queue_type(), "sqlite");
        assert_eq!(providers.default_provider().queue_type(), "sqlite");
    }
}
