use std::sync::Arc;
use std::time::Instant;

use dashmap::{DashMap, DashSet};

/// Progress added to a job on every progress query.
pub const DEFAULT_STEP: u8 = 25;

/// Uploads whose id starts with this prefix render into a job-reported error.
pub const FAILING_UPLOAD_PREFIX: &str = "fail-";

/// A simulated render job.
pub struct RenderJob {
    pub upload_id: String,
    pub progress: u8,
    pub segments: usize,
    pub created_at: Instant,
}

impl RenderJob {
    pub fn will_fail(&self) -> bool {
        self.upload_id.starts_with(FAILING_UPLOAD_PREFIX)
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }
}

/// Shared render stub state.
#[derive(Clone)]
pub struct StubState {
    /// Render jobs, keyed by export token.
    pub jobs: Arc<DashMap<String, RenderJob>>,
    /// Every upload id a cleanup request was received for.
    pub deleted_uploads: Arc<DashSet<String>>,
    /// Every export token a cleanup request was received for.
    pub deleted_exports: Arc<DashSet<String>>,
    pub step: u8,
}

impl StubState {
    pub fn new() -> Self {
        Self::with_step(DEFAULT_STEP)
    }

    pub fn with_step(step: u8) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            deleted_uploads: Arc::new(DashSet::new()),
            deleted_exports: Arc::new(DashSet::new()),
            step: step.clamp(1, 100),
        }
    }
}

impl Default for StubState {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic artifact payload for a finished job.
pub fn artifact_bytes(token: &str, upload_id: &str) -> Vec<u8> {
    format!("SUBTITLER-STUB\nupload={upload_id}\ntoken={token}\n").into_bytes()
}
