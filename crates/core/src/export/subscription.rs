//! Observer handle for the export store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::warn;

use super::types::ExportSnapshot;

/// A live view of the export job.
///
/// Dropping the subscription unsubscribes. Subscriber count never affects
/// polling: the store keeps polling until the job is terminal or reset.
pub struct Subscription {
    latest: watch::Receiver<ExportSnapshot>,
    updates: broadcast::Receiver<ExportSnapshot>,
    count: Arc<AtomicUsize>,
}

impl Subscription {
    pub(crate) fn new(
        latest: watch::Receiver<ExportSnapshot>,
        updates: broadcast::Receiver<ExportSnapshot>,
        count: Arc<AtomicUsize>,
    ) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self {
            latest,
            updates,
            count,
        }
    }

    /// Most recent snapshot.
    pub fn current(&self) -> ExportSnapshot {
        self.latest.borrow().clone()
    }

    /// Next transition, in the order the store applied them.
    ///
    /// A subscriber that falls too far behind skips ahead to the latest
    /// snapshot. Returns `None` once the store is gone.
    pub async fn next(&mut self) -> Option<ExportSnapshot> {
        match self.updates.recv().await {
            Ok(snapshot) => Some(snapshot),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "export subscriber lagged, resyncing");
                self.updates = self.updates.resubscribe();
                Some(self.current())
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Wait until the job is `Complete` or `Error`.
    pub async fn settled(&mut self) -> ExportSnapshot {
        let settled = match self.latest.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => Some(snapshot.clone()),
            Err(_) => None,
        };
        // Store dropped before the job settled.
        settled.unwrap_or_else(|| self.current())
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
