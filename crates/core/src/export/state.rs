// crates/core/src/export/state.rs
//! The export job record and its reducer.
//!
//! Every mutation goes through [`ExportJob::apply`]. Asynchronous results are
//! tagged with the epoch (and token) they were issued for; anything tagged
//! with a superseded epoch or a token that is no longer active is ignored.

use chrono::{DateTime, Utc};
use subtitler_types::RenderRequest;
use tokio::time::Instant;

use super::types::{ExportSnapshot, ExportStatus};

/// Where the job is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPhase {
    Idle,
    Starting,
    Exporting {
        token: String,
        progress: u8,
        time_remaining: Option<u64>,
    },
    Complete {
        token: String,
    },
    /// `token` is kept when the job had been accepted: the render may still
    /// be running server-side and has to be released later.
    Error {
        message: String,
        token: Option<String>,
    },
}

impl ExportPhase {
    pub fn status(&self) -> ExportStatus {
        match self {
            Self::Idle => ExportStatus::Idle,
            Self::Starting => ExportStatus::Starting,
            Self::Exporting { .. } => ExportStatus::Exporting,
            Self::Complete { .. } => ExportStatus::Complete,
            Self::Error { .. } => ExportStatus::Error,
        }
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    /// A new submission begins. Opens a new epoch.
    SubmitStarted { params: RenderRequest },
    SubmitAccepted { epoch: u64, token: String },
    SubmitFailed { epoch: u64, message: String },
    Progress {
        epoch: u64,
        token: String,
        progress: u8,
        time_remaining: Option<u64>,
    },
    Completed { epoch: u64, token: String },
    /// The render service reported the job itself failed.
    JobFailed { epoch: u64, token: String, message: String },
    /// A poll request failed at the transport level.
    PollRetry { epoch: u64, token: String },
    /// The retry budget ran out.
    PollExhausted { epoch: u64, token: String, message: String },
    /// Polling was stopped without changing the phase. Opens a new epoch so
    /// results from the stopped loop are discarded.
    Detach,
    /// Explicit user reset. Clears the retained submission params.
    Reset,
    /// The user went back to editing after an export; the export is stale.
    Invalidate,
}

/// Why the reducer refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    StaleEpoch,
    TokenMismatch,
    NotAllowed(ExportStatus),
}

/// Result of [`ExportJob::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored(IgnoreReason),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// The single mutable export record owned by an [`super::ExportStore`].
#[derive(Debug, Clone)]
pub struct ExportJob {
    phase: ExportPhase,
    epoch: u64,
    retry_count: u32,
    submission_params: Option<RenderRequest>,
    submitted_at: Option<Instant>,
    updated_at: DateTime<Utc>,
}

impl Default for ExportJob {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportJob {
    pub fn new() -> Self {
        Self {
            phase: ExportPhase::Idle,
            epoch: 0,
            retry_count: 0,
            submission_params: None,
            submitted_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> &ExportPhase {
        &self.phase
    }

    pub fn status(&self) -> ExportStatus {
        self.phase.status()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn submission_params(&self) -> Option<&RenderRequest> {
        self.submission_params.as_ref()
    }

    pub fn submitted_at(&self) -> Option<Instant> {
        self.submitted_at
    }

    /// Token of the current job, if one was issued and not discarded.
    pub fn token(&self) -> Option<&str> {
        match &self.phase {
            ExportPhase::Exporting { token, .. } | ExportPhase::Complete { token } => Some(token),
            ExportPhase::Error { token, .. } => token.as_deref(),
            _ => None,
        }
    }

    /// `Starting` or `Exporting`.
    pub fn is_in_flight(&self) -> bool {
        matches!(self.phase, ExportPhase::Starting | ExportPhase::Exporting { .. })
    }

    /// Apply one event.
    pub fn apply(&mut self, event: ExportEvent) -> Transition {
        let result = self.reduce(event);
        if result.is_applied() {
            self.updated_at = Utc::now();
        }
        result
    }

    fn reduce(&mut self, event: ExportEvent) -> Transition {
        use ExportEvent::*;

        match event {
            SubmitStarted { params } => {
                if self.is_in_flight() {
                    return self.not_allowed();
                }
                self.epoch += 1;
                self.phase = ExportPhase::Starting;
                self.retry_count = 0;
                self.submission_params = Some(params);
                self.submitted_at = Some(Instant::now());
                Transition::Applied
            }
            SubmitAccepted { epoch, token } => {
                if let Some(ignored) = self.check_epoch(epoch) {
                    return ignored;
                }
                if self.phase != ExportPhase::Starting {
                    return self.not_allowed();
                }
                self.phase = ExportPhase::Exporting {
                    token,
                    progress: 0,
                    time_remaining: None,
                };
                Transition::Applied
            }
            SubmitFailed { epoch, message } => {
                if let Some(ignored) = self.check_epoch(epoch) {
                    return ignored;
                }
                if self.phase != ExportPhase::Starting {
                    return self.not_allowed();
                }
                self.phase = ExportPhase::Error {
                    message,
                    token: None,
                };
                Transition::Applied
            }
            Progress {
                epoch,
                token: reported,
                progress,
                time_remaining,
            } => {
                if let Some(ignored) = self.check_active(epoch, &reported) {
                    return ignored;
                }
                if let ExportPhase::Exporting {
                    progress: current,
                    time_remaining: remaining,
                    ..
                } = &mut self.phase
                {
                    // Never move backwards for the same token.
                    *current = (*current).max(progress.min(100));
                    *remaining = time_remaining;
                }
                self.retry_count = 0;
                Transition::Applied
            }
            Completed { epoch, token } => {
                if let Some(ignored) = self.check_active(epoch, &token) {
                    return ignored;
                }
                self.phase = ExportPhase::Complete { token };
                self.retry_count = 0;
                Transition::Applied
            }
            JobFailed {
                epoch,
                token,
                message,
            } => {
                if let Some(ignored) = self.check_active(epoch, &token) {
                    return ignored;
                }
                self.phase = ExportPhase::Error {
                    message,
                    token: Some(token),
                };
                self.retry_count = 0;
                Transition::Applied
            }
            PollRetry { epoch, token } => {
                if let Some(ignored) = self.check_active(epoch, &token) {
                    return ignored;
                }
                self.retry_count += 1;
                Transition::Applied
            }
            PollExhausted {
                epoch,
                token,
                message,
            } => {
                if let Some(ignored) = self.check_active(epoch, &token) {
                    return ignored;
                }
                self.phase = ExportPhase::Error {
                    message,
                    token: Some(token),
                };
                Transition::Applied
            }
            Detach => {
                self.epoch += 1;
                Transition::Applied
            }
            Reset => {
                self.epoch += 1;
                self.phase = ExportPhase::Idle;
                self.retry_count = 0;
                self.submission_params = None;
                self.submitted_at = None;
                Transition::Applied
            }
            Invalidate => {
                self.epoch += 1;
                self.phase = ExportPhase::Idle;
                self.retry_count = 0;
                self.submitted_at = None;
                Transition::Applied
            }
        }
    }

    fn not_allowed(&self) -> Transition {
        Transition::Ignored(IgnoreReason::NotAllowed(self.status()))
    }

    fn check_epoch(&self, epoch: u64) -> Option<Transition> {
        (epoch != self.epoch).then_some(Transition::Ignored(IgnoreReason::StaleEpoch))
    }

    /// Poll results only apply to the live `Exporting` job they were issued for.
    fn check_active(&self, epoch: u64, token: &str) -> Option<Transition> {
        if let Some(ignored) = self.check_epoch(epoch) {
            return Some(ignored);
        }
        match &self.phase {
            ExportPhase::Exporting { token: active, .. } if active == token => None,
            ExportPhase::Exporting { .. } => Some(Transition::Ignored(IgnoreReason::TokenMismatch)),
            _ => Some(self.not_allowed()),
        }
    }

    /// Immutable copy for subscribers.
    pub fn snapshot(&self) -> ExportSnapshot {
        let (progress, time_remaining, error) = match &self.phase {
            ExportPhase::Exporting {
                progress,
                time_remaining,
                ..
            } => (*progress, *time_remaining, None),
            ExportPhase::Complete { .. } => (100, None, None),
            ExportPhase::Error { message, .. } => (0, None, Some(message.clone())),
            ExportPhase::Idle | ExportPhase::Starting => (0, None, None),
        };
        ExportSnapshot {
            status: self.status(),
            token: self.token().map(str::to_owned),
            progress,
            time_remaining,
            error,
            retry_count: self.retry_count,
            can_retry: self.submission_params.is_some() && !self.is_in_flight(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}
