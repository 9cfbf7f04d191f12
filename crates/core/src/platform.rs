//! Platform seams: navigation history and the page-unload signal.
//!
//! The orchestrator never touches a browser directly. A web front end binds
//! these to the History API and `navigator.sendBeacon`; native hosts and
//! tests use the implementations below.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use subtitler_types::WizardStep;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{CleanupTarget, ExportTransport};

/// Navigation history keyed by wizard step.
pub trait NavigationHistory: Send {
    /// Add a new entry after the current one.
    fn push(&mut self, step: WizardStep);

    /// Overwrite the current entry.
    fn replace(&mut self, step: WizardStep);

    /// Step of the current entry, if any.
    fn current(&self) -> Option<WizardStep>;
}

/// Stack-with-cursor history, mirroring browser semantics: pushing after
/// going back discards the forward entries.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    entries: Vec<WizardStep>,
    cursor: usize,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[WizardStep] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move one entry back. Returns the entry's history key.
    pub fn back(&mut self) -> Option<&'static str> {
        if self.cursor == 0 || self.entries.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(WizardStep::as_str)
    }

    /// Move one entry forward. Returns the entry's history key.
    pub fn forward(&mut self) -> Option<&'static str> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).map(WizardStep::as_str)
    }
}

impl NavigationHistory for InMemoryHistory {
    fn push(&mut self, step: WizardStep) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push(step);
        self.cursor = self.entries.len() - 1;
    }

    fn replace(&mut self, step: WizardStep) {
        match self.entries.get_mut(self.cursor) {
            Some(entry) => *entry = step,
            None => self.push(step),
        }
    }

    fn current(&self) -> Option<WizardStep> {
        self.entries.get(self.cursor).copied()
    }
}

/// Non-blocking "the page is going away" delivery primitive.
///
/// `dispatch` must return immediately. `true` means the request was queued,
/// not that it arrived.
pub trait UnloadSignal: Send + Sync {
    fn dispatch(&self, target: &CleanupTarget) -> bool;
}

impl<T: UnloadSignal + ?Sized> UnloadSignal for Arc<T> {
    fn dispatch(&self, target: &CleanupTarget) -> bool {
        (**self).dispatch(target)
    }
}

/// Native stand-in for a beacon: queues the cleanup call on the runtime and
/// returns without waiting for it.
///
/// A beacon outlives the page; a spawned task dies with the runtime. Hosts
/// that are about to exit call [`flush`](Self::flush) to give queued calls
/// a bounded chance to finish.
pub struct TransportUnloadSignal {
    transport: Arc<dyn ExportTransport>,
    handle: tokio::runtime::Handle,
    queued: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportUnloadSignal {
    pub fn new(transport: Arc<dyn ExportTransport>, handle: tokio::runtime::Handle) -> Self {
        Self {
            transport,
            handle,
            queued: Mutex::new(Vec::new()),
        }
    }

    fn lock_queued(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.queued.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned in unload queue: {e}");
            e.into_inner()
        })
    }

    /// Wait up to `grace` for every queued cleanup. Returns `false` if some
    /// were still running when the grace period ran out; those keep running
    /// detached.
    pub async fn flush(&self, grace: Duration) -> bool {
        let queued = std::mem::take(&mut *self.lock_queued());
        let count = queued.len();
        let all = async move {
            for task in queued {
                // A panicked cleanup is as good as a lost beacon.
                let _ = task.await;
            }
        };
        match tokio::time::timeout(grace, all).await {
            Ok(()) => {
                debug!(count, "unload cleanups flushed");
                true
            }
            Err(_) => {
                warn!(count, grace_ms = grace.as_millis() as u64, "unload cleanups still pending");
                false
            }
        }
    }
}

impl UnloadSignal for TransportUnloadSignal {
    fn dispatch(&self, target: &CleanupTarget) -> bool {
        let transport = Arc::clone(&self.transport);
        let target = target.clone();
        let task = self.handle.spawn(async move {
            if let Err(e) = transport.cleanup(&target).await {
                warn!(%target, error = %e, "unload cleanup failed (ignored)");
            }
        });
        let mut queued = self.lock_queued();
        queued.retain(|t| !t.is_finished());
        queued.push(task);
        true
    }
}

/// Drops every signal. For hosts without an unload hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUnload;

impl UnloadSignal for NoopUnload {
    fn dispatch(&self, _target: &CleanupTarget) -> bool {
        false
    }
}
