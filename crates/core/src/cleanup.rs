// crates/core/src/cleanup.rs
//! Best-effort release of server-side uploads and render jobs.
//!
//! Cleanup never blocks a UI transition and never reports failure upward:
//! the render service garbage-collects orphans on its own TTL, so a lost
//! request only delays reclamation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::platform::UnloadSignal;
use crate::transport::{CleanupTarget, ExportTransport};

/// Which abandonment path triggered a cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    Reset,
    Invalidated,
    Superseded,
    Unload,
}

impl CleanupReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Invalidated => "invalidated",
            Self::Superseded => "superseded",
            Self::Unload => "unload",
        }
    }
}

/// Fires cleanup requests, at most once per target.
#[derive(Clone)]
pub struct CleanupCoordinator {
    transport: Arc<dyn ExportTransport>,
    released: Arc<Mutex<HashSet<CleanupTarget>>>,
}

impl CleanupCoordinator {
    pub fn new(transport: Arc<dyn ExportTransport>) -> Self {
        Self {
            transport,
            released: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Record `target` as released. Returns `false` if it already was.
    fn mark_released(&self, target: &CleanupTarget) -> bool {
        let mut released = self.released.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned in cleanup registry: {e}");
            e.into_inner()
        });
        released.insert(target.clone())
    }

    pub fn is_released(&self, target: &CleanupTarget) -> bool {
        self.released
            .lock()
            .map(|r| r.contains(target))
            .unwrap_or(false)
    }

    /// Fire-and-forget release of `target` on a detached task.
    ///
    /// Returns `true` if a request was dispatched, `false` if the target had
    /// already been released or no runtime is available.
    pub fn release(&self, target: CleanupTarget, reason: CleanupReason) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!(%target, "no async runtime, cleanup dropped");
                return false;
            }
        };

        if !self.mark_released(&target) {
            debug!(%target, reason = reason.as_str(), "cleanup already sent, skipping");
            return false;
        }

        let transport = Arc::clone(&self.transport);
        handle.spawn(async move {
            match transport.cleanup(&target).await {
                Ok(()) => debug!(%target, reason = reason.as_str(), "released"),
                Err(e) => warn!(%target, reason = reason.as_str(), error = %e, "cleanup failed (ignored)"),
            }
        });
        true
    }

    /// Release through the platform's unload primitive. The page may be
    /// going away, so nothing is awaited.
    pub fn release_on_unload(&self, target: CleanupTarget, signal: &dyn UnloadSignal) -> bool {
        if !self.mark_released(&target) {
            return false;
        }
        let queued = signal.dispatch(&target);
        if !queued {
            warn!(%target, "unload signal refused cleanup");
        }
        queued
    }
}
