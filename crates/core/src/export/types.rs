// crates/core/src/export/types.rs
//! Types published by the export store.

use serde::Serialize;

/// Coarse status of the export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Idle,
    Starting,
    Exporting,
    Complete,
    Error,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Exporting => "exporting",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// `Complete` or `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the export job, sent to subscribers on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub status: ExportStatus,
    pub token: Option<String>,
    pub progress: u8,
    pub time_remaining: Option<u64>,
    pub error: Option<String>,
    pub retry_count: u32,
    /// A failed or finished submission can be replayed with `retry()`.
    pub can_retry: bool,
    pub updated_at: String,
}

/// Where to fetch a finished export from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHandle {
    pub token: String,
    pub download_url: String,
}
