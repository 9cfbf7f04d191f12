// crates/types/src/progress.rs
//! Submission and progress payloads of the render service.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Body of a successful `POST /api/exports`.
///
/// `export_token` is optional on the wire so that a 2xx reply without a
/// token can be told apart from a body that fails to parse at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_token: Option<String>,
}

impl SubmitResponse {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            export_token: Some(token.into()),
        }
    }

    /// The token, if present and not blank.
    pub fn token(&self) -> Option<&str> {
        self.export_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Job state as reported by the render service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Exporting,
    Complete,
    Error,
}

/// Body of `GET /api/exports/{token}/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub status: ProgressStatus,
    /// Percent complete, 0-100. Servers occasionally send fractional values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Estimated seconds left. Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportProgress {
    pub fn exporting(progress: f64, time_remaining: Option<f64>) -> Self {
        Self {
            status: ProgressStatus::Exporting,
            progress: Some(progress),
            time_remaining,
            error: None,
        }
    }

    pub fn complete() -> Self {
        Self {
            status: ProgressStatus::Complete,
            progress: Some(100.0),
            time_remaining: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ProgressStatus::Error,
            progress: None,
            time_remaining: None,
            error: Some(message.into()),
        }
    }

    /// Progress clamped into 0..=100 and rounded to a whole percent.
    pub fn percent(&self) -> u8 {
        match self.progress {
            Some(p) if p.is_finite() => p.round().clamp(0.0, 100.0) as u8,
            _ => 0,
        }
    }

    /// Remaining time in whole seconds, if the server sent a usable estimate.
    pub fn remaining_secs(&self) -> Option<u64> {
        self.time_remaining
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(|t| t.round() as u64)
    }
}
