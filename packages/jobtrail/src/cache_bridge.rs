//! Forwards `data_changed` notices from the stream to the local cache.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use jobtrail_transport::DataChanged;

/// Something holding cached server data keyed by `(resource, id)`.
pub trait CacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self, change: &DataChanged);
}

/// Keeps the most recent notices for display; the terminal client has no
/// query cache of its own.
pub struct RecentChanges {
    capacity: usize,
    entries: Mutex<VecDeque<DataChanged>>,
}

impl RecentChanges {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<DataChanged> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }
}

impl CacheInvalidator for RecentChanges {
    fn invalidate(&self, change: &DataChanged) {
        info!(
            resource = %change.resource,
            id = %change.id,
            action = %change.action,
            "Server data changed"
        );
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(change.clone());
    }
}

/// Drain notices until the transport drops its sender.
pub async fn run(mut rx: mpsc::Receiver<DataChanged>, invalidator: Arc<dyn CacheInvalidator>) {
    while let Some(change) = rx.recv().await {
        invalidator.invalidate(&change);
    }
    debug!("Data change channel closed");
}
