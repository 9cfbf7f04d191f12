// crates/core/src/export/poller.rs
//! Progress polling loop.
//!
//! One task per store. The next request is issued only after the previous
//! one resolved and its delay elapsed, so results arrive in request order.

use std::sync::Arc;

use subtitler_types::ProgressStatus;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::ExportEvent;
use super::store::{ExportStore, PollFailure};
use crate::error::TransportError;

pub const CONNECTION_LOST_MESSAGE: &str =
    "Lost connection to the render service. Please try the export again.";
pub const JOB_FAILED_MESSAGE: &str = "Export failed";
pub const JOB_NOT_FOUND_MESSAGE: &str = "Export job not found";

pub(crate) async fn run(store: Arc<ExportStore>, token: String, epoch: u64) {
    let config = store.poll_config().clone();
    let started = store.submitted_at().unwrap_or_else(Instant::now);
    let mut delay = config.interval_at(started.elapsed());
    debug!(%token, epoch, "poller started");

    loop {
        tokio::time::sleep(delay).await;

        match store.transport().poll(&token).await {
            Ok(report) => match report.status {
                ProgressStatus::Exporting => {
                    let event = ExportEvent::Progress {
                        epoch,
                        token: token.clone(),
                        progress: report.percent(),
                        time_remaining: report.remaining_secs(),
                    };
                    if !store.dispatch(event).is_applied() {
                        debug!(%token, "poller superseded, exiting");
                        return;
                    }
                    delay = config.interval_at(started.elapsed());
                }
                ProgressStatus::Complete => {
                    let event = ExportEvent::Completed {
                        epoch,
                        token: token.clone(),
                    };
                    if store.dispatch(event).is_applied() {
                        info!(%token, "export complete");
                    }
                    return;
                }
                ProgressStatus::Error => {
                    let message = report
                        .error
                        .filter(|m| !m.trim().is_empty())
                        .unwrap_or_else(|| JOB_FAILED_MESSAGE.to_string());
                    warn!(%token, %message, "render service reported failure");
                    store.dispatch(ExportEvent::JobFailed {
                        epoch,
                        token: token.clone(),
                        message,
                    });
                    return;
                }
            },
            Err(e) if e.is_transient() => {
                let attempt = match store.record_poll_failure(epoch, &token, config.retry_budget) {
                    PollFailure::Retry(attempt) => attempt,
                    PollFailure::Exhausted => {
                        warn!(%token, error = %e, "poll retry budget exhausted");
                        return;
                    }
                    PollFailure::Superseded => {
                        debug!(%token, "poller superseded during retry, exiting");
                        return;
                    }
                };
                delay = config.backoff(attempt);
                debug!(
                    %token,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "poll failed, retrying"
                );
            }
            Err(e) => {
                warn!(%token, error = %e, "poll failed permanently");
                let message = match e {
                    TransportError::NotFound(_) => JOB_NOT_FOUND_MESSAGE.to_string(),
                    other => other.to_string(),
                };
                store.dispatch(ExportEvent::JobFailed {
                    epoch,
                    token: token.clone(),
                    message,
                });
                return;
            }
        }
    }
}
