// crates/core/src/export/store.rs
//! The export orchestrator: submission, polling lifecycle, reset and
//! invalidation, subscriptions and artifact handoff.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use subtitler_types::RenderRequest;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::poller::{self, CONNECTION_LOST_MESSAGE};
use super::state::{ExportEvent, ExportJob, ExportPhase, Transition};
use super::subscription::Subscription;
use super::types::{ArtifactHandle, ExportSnapshot, ExportStatus};
use crate::cleanup::{CleanupCoordinator, CleanupReason};
use crate::config::PollConfig;
use crate::error::SubmissionError;
use crate::transport::{CleanupTarget, ExportTransport};

struct PollerHandle {
    token: String,
    epoch: u64,
    task: JoinHandle<()>,
}

/// Outcome of a transient poll failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollFailure {
    /// Back off and poll again; carries the attempt number.
    Retry(u32),
    /// Budget spent; the job is now `Error`.
    Exhausted,
    /// The loop no longer owns the job.
    Superseded,
}

/// Owns one export job and everything that mutates it.
///
/// Construct one per independent export flow and hand the `Arc` to whoever
/// needs it. The job record sits behind a mutex that is only held while the
/// reducer runs, never across an `.await`.
pub struct ExportStore {
    transport: Arc<dyn ExportTransport>,
    poll_config: PollConfig,
    cleanup: CleanupCoordinator,
    job: Mutex<ExportJob>,
    latest_tx: watch::Sender<ExportSnapshot>,
    updates_tx: broadcast::Sender<ExportSnapshot>,
    subscribers: Arc<AtomicUsize>,
    poller: Mutex<Option<PollerHandle>>,
    /// Epoch whose poller must not start once the job is accepted. Set by
    /// `stop_polling` while `Starting`; epochs start at 1 so 0 means none.
    held_epoch: AtomicU64,
}

impl ExportStore {
    pub fn new(transport: Arc<dyn ExportTransport>, poll_config: PollConfig) -> Arc<Self> {
        let job = ExportJob::new();
        let (latest_tx, _) = watch::channel(job.snapshot());
        let (updates_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            cleanup: CleanupCoordinator::new(Arc::clone(&transport)),
            transport,
            poll_config,
            job: Mutex::new(job),
            latest_tx,
            updates_tx,
            subscribers: Arc::new(AtomicUsize::new(0)),
            poller: Mutex::new(None),
            held_epoch: AtomicU64::new(0),
        })
    }

    // -- Accessors ------------------------------------------------------------

    pub fn snapshot(&self) -> ExportSnapshot {
        self.lock_job().snapshot()
    }

    pub fn status(&self) -> ExportStatus {
        self.lock_job().status()
    }

    /// Upload id of the last submission, if any.
    pub fn upload_id(&self) -> Option<String> {
        self.lock_job()
            .submission_params()
            .map(|p| p.upload_id.clone())
    }

    pub fn cleanup(&self) -> &CleanupCoordinator {
        &self.cleanup
    }

    pub(crate) fn transport(&self) -> &Arc<dyn ExportTransport> {
        &self.transport
    }

    pub(crate) fn poll_config(&self) -> &PollConfig {
        &self.poll_config
    }

    pub(crate) fn submitted_at(&self) -> Option<Instant> {
        self.lock_job().submitted_at()
    }

    fn lock_job(&self) -> MutexGuard<'_, ExportJob> {
        self.job.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned reading export job: {e}");
            e.into_inner()
        })
    }

    fn lock_poller(&self) -> MutexGuard<'_, Option<PollerHandle>> {
        self.poller.lock().unwrap_or_else(|e| {
            tracing::error!("Mutex poisoned reading poller slot: {e}");
            e.into_inner()
        })
    }

    // -- Reducer plumbing -----------------------------------------------------

    fn publish(&self, job: &ExportJob) {
        let snapshot = job.snapshot();
        self.latest_tx.send_replace(snapshot.clone());
        // No subscribers is fine.
        let _ = self.updates_tx.send(snapshot);
    }

    pub(crate) fn dispatch(&self, event: ExportEvent) -> Transition {
        let mut job = self.lock_job();
        self.apply_locked(&mut job, event)
    }

    /// Count a transient poll failure against `budget`. The budget check and
    /// the resulting event happen under one lock, so no snapshot ever shows
    /// more retries than the budget allows.
    pub(crate) fn record_poll_failure(&self, epoch: u64, token: &str, budget: u32) -> PollFailure {
        let mut job = self.lock_job();
        if job.retry_count() >= budget {
            let exhausted = ExportEvent::PollExhausted {
                epoch,
                token: token.to_owned(),
                message: CONNECTION_LOST_MESSAGE.to_string(),
            };
            return match self.apply_locked(&mut job, exhausted) {
                Transition::Applied => PollFailure::Exhausted,
                Transition::Ignored(_) => PollFailure::Superseded,
            };
        }
        let retry = ExportEvent::PollRetry {
            epoch,
            token: token.to_owned(),
        };
        match self.apply_locked(&mut job, retry) {
            Transition::Applied => PollFailure::Retry(job.retry_count()),
            Transition::Ignored(_) => PollFailure::Superseded,
        }
    }

    fn apply_locked(&self, job: &mut ExportJob, event: ExportEvent) -> Transition {
        let transition = job.apply(event);
        match &transition {
            Transition::Applied => self.publish(job),
            Transition::Ignored(reason) => {
                debug!(?reason, status = %job.status(), "export event ignored");
            }
        }
        transition
    }

    // -- Submission -----------------------------------------------------------

    /// Submit a render request and start polling its token.
    ///
    /// Rejected without side effects when the request is invalid or another
    /// export is `Starting`/`Exporting`.
    pub async fn submit(self: &Arc<Self>, request: RenderRequest) -> Result<String, SubmissionError> {
        request.validate()?;

        let (epoch, superseded) = {
            let mut job = self.lock_job();
            if job.is_in_flight() {
                warn!(status = %job.status(), "export already in progress, rejecting submit");
                return Err(SubmissionError::AlreadyInProgress);
            }
            let superseded = job.token().map(str::to_owned);
            job.apply(ExportEvent::SubmitStarted {
                params: request.clone(),
            });
            self.publish(&job);
            (job.epoch(), superseded)
        };

        self.abort_poller();
        if let Some(old) = superseded {
            self.cleanup
                .release(CleanupTarget::Export(old), CleanupReason::Superseded);
        }

        info!(
            upload_id = %request.upload_id,
            segments = request.segments.len(),
            epoch,
            "submitting export"
        );

        let token = match self.transport.submit(&request).await {
            Ok(resp) => match resp.token() {
                Some(token) => token.to_owned(),
                None => return Err(self.fail_submission(epoch, SubmissionError::MissingToken)),
            },
            Err(e) => return Err(self.fail_submission(epoch, e.into())),
        };

        let accepted = ExportEvent::SubmitAccepted {
            epoch,
            token: token.clone(),
        };
        if !self.dispatch(accepted).is_applied() {
            info!(%token, "export abandoned before it was accepted, releasing");
            self.cleanup
                .release(CleanupTarget::Export(token), CleanupReason::Superseded);
            return Err(SubmissionError::Cancelled);
        }

        info!(%token, "export accepted");
        self.spawn_poller(token.clone(), epoch);
        Ok(token)
    }

    fn fail_submission(&self, epoch: u64, err: SubmissionError) -> SubmissionError {
        warn!(error = %err, "export submission failed");
        let failed = ExportEvent::SubmitFailed {
            epoch,
            message: err.to_string(),
        };
        if self.dispatch(failed).is_applied() {
            err
        } else {
            SubmissionError::Cancelled
        }
    }

    /// Replay the last submission without re-collecting user input.
    pub async fn retry(self: &Arc<Self>) -> Result<String, SubmissionError> {
        let params = {
            let job = self.lock_job();
            if job.is_in_flight() {
                return Err(SubmissionError::AlreadyInProgress);
            }
            job.submission_params().cloned()
        };
        let params = params.ok_or(SubmissionError::NothingToRetry)?;
        info!(upload_id = %params.upload_id, "retrying export");
        self.submit(params).await
    }

    // -- Polling lifecycle ----------------------------------------------------

    /// Start polling `token`. Idempotent for the active token; returns
    /// `false` if `token` is not the job currently exporting.
    pub fn start_polling(self: &Arc<Self>, token: &str) -> bool {
        let epoch = {
            let job = self.lock_job();
            match job.phase() {
                ExportPhase::Exporting { token: active, .. } if active == token => job.epoch(),
                _ => return false,
            }
        };
        self.held_epoch.store(0, Ordering::Relaxed);
        self.spawn_poller(token.to_owned(), epoch)
    }

    /// Install a poll loop for `token` at `epoch`. The job lock is held while
    /// the slot changes, so a reset or resubmit that already moved the job on
    /// cannot be overtaken by a loop for the old job.
    pub(crate) fn spawn_poller(self: &Arc<Self>, token: String, epoch: u64) -> bool {
        let job = self.lock_job();
        let owns_job = job.epoch() == epoch
            && matches!(job.phase(), ExportPhase::Exporting { token: active, .. } if *active == token);
        if !owns_job {
            debug!(%token, epoch, current = job.epoch(), "not polling a job that moved on");
            return false;
        }
        if self.held_epoch.load(Ordering::Relaxed) == epoch {
            info!(%token, "polling was stopped before the export was accepted");
            return false;
        }
        let mut slot = self.lock_poller();
        if let Some(current) = slot.as_ref() {
            if current.token == token && current.epoch == epoch && !current.task.is_finished() {
                debug!(%token, "poller already running");
                return true;
            }
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                warn!(%token, "no async runtime, cannot poll");
                return false;
            }
        };
        if let Some(old) = slot.take() {
            old.task.abort();
        }
        let task = handle.spawn(poller::run(Arc::clone(self), token.clone(), epoch));
        *slot = Some(PollerHandle { token, epoch, task });
        true
    }

    /// Stop polling without changing the job's status. Results still in
    /// flight are discarded.
    ///
    /// While `Starting`, the submission is left to finish: the job still
    /// becomes `Exporting` once accepted, but no poller starts until
    /// `start_polling` is called for its token.
    pub fn stop_polling(&self) {
        {
            let mut job = self.lock_job();
            match job.status() {
                ExportStatus::Exporting => {
                    self.apply_locked(&mut job, ExportEvent::Detach);
                }
                ExportStatus::Starting => {
                    debug!(epoch = job.epoch(), "holding poller for pending submission");
                    self.held_epoch.store(job.epoch(), Ordering::Relaxed);
                }
                _ => {}
            }
        }
        self.abort_poller();
    }

    fn abort_poller(&self) {
        if let Some(handle) = self.lock_poller().take() {
            debug!(token = %handle.token, "stopping poller");
            handle.task.abort();
        }
    }

    /// Whether a poll loop is currently alive.
    pub fn is_polling(&self) -> bool {
        self.lock_poller()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    // -- Abandonment ----------------------------------------------------------

    /// Return to `Idle`, stop polling and release the upload and any job.
    pub fn reset(&self) {
        let (token, upload) = {
            let job = self.lock_job();
            (
                job.token().map(str::to_owned),
                job.submission_params().map(|p| p.upload_id.clone()),
            )
        };
        self.dispatch(ExportEvent::Reset);
        self.abort_poller();
        info!(token = ?token, "export reset");

        if let Some(token) = token {
            self.cleanup
                .release(CleanupTarget::Export(token), CleanupReason::Reset);
        }
        if let Some(upload) = upload {
            self.cleanup
                .release(CleanupTarget::Upload(upload), CleanupReason::Reset);
        }
    }

    /// Discard the current export because its inputs changed. The upload
    /// stays; only the render job is released.
    pub fn invalidate(&self) {
        let token = self.lock_job().token().map(str::to_owned);
        self.dispatch(ExportEvent::Invalidate);
        self.abort_poller();
        if let Some(token) = token {
            info!(%token, "export invalidated");
            self.cleanup
                .release(CleanupTarget::Export(token), CleanupReason::Invalidated);
        }
    }

    // -- Observers ------------------------------------------------------------

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(
            self.latest_tx.subscribe(),
            self.updates_tx.subscribe(),
            Arc::clone(&self.subscribers),
        )
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Download location of a finished export. `None` unless `Complete`.
    pub fn artifact(&self) -> Option<ArtifactHandle> {
        let job = self.lock_job();
        match job.phase() {
            ExportPhase::Complete { token } => Some(ArtifactHandle {
                token: token.clone(),
                download_url: self.transport.download_url(token),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::export::poller::{CONNECTION_LOST_MESSAGE, JOB_NOT_FOUND_MESSAGE};
    use crate::test_support::{request, ScriptedTransport};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use subtitler_types::{ExportProgress, SubmitResponse};

    fn store_with(transport: &Arc<ScriptedTransport>) -> Arc<ExportStore> {
        ExportStore::new(transport.clone(), PollConfig::default())
    }

    fn network_error() -> Result<ExportProgress, TransportError> {
        Err(TransportError::Network("connection reset".into()))
    }

    /// Collect snapshots until a terminal one arrives.
    async fn drain_until_terminal(sub: &mut Subscription) -> Vec<ExportSnapshot> {
        let mut seen = Vec::new();
        while let Some(snap) = sub.next().await {
            let done = snap.status.is_terminal();
            seen.push(snap);
            if done {
                break;
            }
        }
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_poll_complete_scenario() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Ok(ExportProgress::exporting(40.0, Some(20.0))));
        transport.push_poll(Ok(ExportProgress::complete()));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        assert_eq!(store.status(), ExportStatus::Idle);
        let token = store.submit(request("u1")).await.unwrap();
        assert_eq!(token, "tok-1");

        let seen = drain_until_terminal(&mut sub).await;
        let statuses: Vec<_> = seen.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                ExportStatus::Starting,
                ExportStatus::Exporting,
                ExportStatus::Exporting,
                ExportStatus::Complete,
            ]
        );
        assert_eq!(seen[1].token.as_deref(), Some("tok-1"));
        assert_eq!(seen[2].progress, 40);
        assert_eq!(seen[2].time_remaining, Some(20));

        let last = store.snapshot();
        assert_eq!(last.status, ExportStatus::Complete);
        assert_eq!(last.progress, 100);
        assert_eq!(transport.poll_count(), 2);
        assert!(!store.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_exhausted_after_three_retries() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..4 {
            transport.push_poll(network_error());
        }
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let seen = drain_until_terminal(&mut sub).await;

        let final_snap = seen.last().unwrap();
        assert_eq!(final_snap.status, ExportStatus::Error);
        assert_eq!(final_snap.error.as_deref(), Some(CONNECTION_LOST_MESSAGE));
        assert_eq!(
            seen.iter().filter(|s| s.status == ExportStatus::Error).count(),
            1
        );
        assert!(seen.iter().all(|s| s.retry_count <= 3));

        // One initial poll plus three retries.
        let polls = transport.polls();
        assert_eq!(polls.len(), 4);
        let gaps: Vec<Duration> = polls.windows(2).map(|w| w[1].1 - w[0].1).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );

        // No further polling once the budget is spent.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.poll_count(), 4);
        assert!(!store.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_poll_resets_retry_count() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(network_error());
        transport.push_poll(network_error());
        transport.push_poll(Ok(ExportProgress::exporting(10.0, None)));
        transport.push_poll(network_error());
        transport.push_poll(network_error());
        transport.push_poll(network_error());
        transport.push_poll(Ok(ExportProgress::complete()));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let seen = drain_until_terminal(&mut sub).await;
        assert_eq!(seen.last().unwrap().status, ExportStatus::Complete);
        let max_retry = seen.iter().map(|s| s.retry_count).max().unwrap();
        assert_eq!(max_retry, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_reported_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Ok(ExportProgress::failed("ffmpeg exited with code 1")));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let snap = sub.settled().await;
        assert_eq!(snap.status, ExportStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("ffmpeg exited with code 1"));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job_is_terminal() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Err(TransportError::NotFound("no such export".into())));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let snap = sub.settled().await;
        assert_eq!(snap.error.as_deref(), Some(JOB_NOT_FOUND_MESSAGE));
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_monotonic() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Ok(ExportProgress::exporting(40.0, None)));
        transport.push_poll(Ok(ExportProgress::exporting(30.0, None)));
        transport.push_poll(Ok(ExportProgress::exporting(55.0, None)));
        transport.push_poll(Ok(ExportProgress::complete()));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let seen = drain_until_terminal(&mut sub).await;
        let progress: Vec<u8> = seen
            .iter()
            .filter(|s| s.status == ExportStatus::Exporting)
            .map(|s| s.progress)
            .collect();
        assert_eq!(progress, vec![0, 40, 40, 55]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_widens_after_threshold() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);
        store.submit(request("u1")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        store.stop_polling();

        let polls = transport.polls();
        let gaps: Vec<Duration> = polls.windows(2).map(|w| w[1].1 - w[0].1).collect();
        assert_eq!(gaps.first(), Some(&Duration::from_secs(2)));
        assert_eq!(gaps.last(), Some(&Duration::from_secs(5)));
        assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_rejected_while_starting() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_submit_delay(Duration::from_secs(5));
        let store = store_with(&transport);

        let first = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.submit(request("u1")).await }
        });
        while store.status() != ExportStatus::Starting {
            tokio::task::yield_now().await;
        }

        let before = store.snapshot();
        let err = store.submit(request("u2")).await.unwrap_err();
        assert_eq!(err, SubmissionError::AlreadyInProgress);
        assert_eq!(store.snapshot(), before);
        assert_eq!(transport.submits().len(), 1);

        assert_eq!(first.await.unwrap(), Ok("tok-1".to_string()));
        assert_eq!(
            store.submit(request("u3")).await,
            Err(SubmissionError::AlreadyInProgress)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_while_exporting_stops_polling_and_cleans_up() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);
        store.submit(request("u1")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(transport.poll_count(), 1);
        assert!(store.is_polling());

        store.reset();
        assert_eq!(store.status(), ExportStatus::Idle);
        assert_eq!(store.snapshot().token, None);
        assert!(!store.is_polling());

        transport.settle().await;
        let cleanups = transport.cleanups();
        assert!(cleanups.contains(&CleanupTarget::Export("tok-1".into())));
        assert!(cleanups.contains(&CleanupTarget::Upload("u1".into())));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_for_old_token_is_discarded() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);

        store.submit(request("u1")).await.unwrap();
        let stale_epoch = store.lock_job().epoch();
        store.reset();
        let token_b = store.submit(request("u2")).await.unwrap();
        assert_eq!(token_b, "tok-2");

        // A response for tok-1 that was already on the wire lands now.
        let late = store.dispatch(ExportEvent::Completed {
            epoch: stale_epoch,
            token: "tok-1".into(),
        });
        assert!(!late.is_applied());
        let current_epoch = store.lock_job().epoch();
        let foreign = store.dispatch(ExportEvent::Progress {
            epoch: current_epoch,
            token: "tok-1".into(),
            progress: 90,
            time_remaining: None,
        });
        assert!(!foreign.is_applied());

        let snap = store.snapshot();
        assert_eq!(snap.status, ExportStatus::Exporting);
        assert_eq!(snap.token.as_deref(), Some("tok-2"));
        assert_eq!(snap.progress, 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(transport.polls().iter().all(|(t, _)| t == "tok-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_in_flight_poll_ignores_old_job() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_poll_delay(Duration::from_secs(10));
        // Only the first job ever hears back that it finished.
        transport.push_poll_for("tok-1", Ok(ExportProgress::complete()));
        let store = store_with(&transport);
        let start = Instant::now();

        store.submit(request("u1")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        // tok-1's first poll went out at 2s and answers at 12s.
        assert_eq!(transport.polls(), vec![("tok-1".to_string(), start + Duration::from_secs(2))]);

        store.reset();
        let token = store.submit(request("u2")).await.unwrap();
        assert_eq!(token, "tok-2");

        tokio::time::sleep(Duration::from_secs(20)).await;
        let snap = store.snapshot();
        assert_eq!(snap.status, ExportStatus::Exporting);
        assert_eq!(snap.token.as_deref(), Some("tok-2"));
        assert_eq!(store.artifact(), None);

        let polls = transport.polls();
        assert_eq!(polls.iter().filter(|(t, _)| t == "tok-1").count(), 1);
        assert!(polls[1..].iter().all(|(t, _)| t == "tok-2"));
        assert!(store.is_polling());

        transport.settle().await;
        let cleanups = transport.cleanups();
        assert!(cleanups.contains(&CleanupTarget::Export("tok-1".into())));
        assert!(cleanups.contains(&CleanupTarget::Upload("u1".into())));
        assert!(!cleanups.contains(&CleanupTarget::Export("tok-2".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_poller_cannot_replace_live_one() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);

        store.submit(request("u1")).await.unwrap();
        let stale_epoch = store.lock_job().epoch();
        store.reset();
        assert!(!store.spawn_poller("tok-1".into(), stale_epoch));
        assert!(!store.is_polling());

        store.submit(request("u2")).await.unwrap();
        let live_epoch = store.lock_job().epoch();
        assert!(!store.spawn_poller("tok-1".into(), stale_epoch));
        assert!(!store.spawn_poller("tok-1".into(), live_epoch));
        assert!(store.spawn_poller("tok-2".into(), live_epoch));
        assert!(store.is_polling());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.polls().iter().all(|(t, _)| t == "tok-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_job_token_is_released_on_reset() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..4 {
            transport.push_poll(network_error());
        }
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let snap = sub.settled().await;
        assert_eq!(snap.status, ExportStatus::Error);
        // The render may still be running server-side.
        assert_eq!(snap.token.as_deref(), Some("tok-1"));
        assert_eq!(store.artifact(), None);

        store.reset();
        transport.settle().await;
        let cleanups = transport.cleanups();
        assert!(cleanups.contains(&CleanupTarget::Export("tok-1".into())));
        assert!(cleanups.contains(&CleanupTarget::Upload("u1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_failed_job_supersedes_its_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Ok(ExportProgress::failed("encoder crashed")));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        sub.settled().await;
        assert_eq!(store.snapshot().token.as_deref(), Some("tok-1"));

        let token = store.retry().await.unwrap();
        assert_eq!(token, "tok-2");
        transport.settle().await;
        assert_eq!(
            transport.cleanups(),
            vec![CleanupTarget::Export("tok-1".into())]
        );

        store.reset();
        transport.settle().await;
        let cleanups = transport.cleanups();
        assert!(cleanups.contains(&CleanupTarget::Export("tok-2".into())));
        assert!(cleanups.contains(&CleanupTarget::Upload("u1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_budget_fails_on_first_transient_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(network_error());
        let config = PollConfig {
            retry_budget: 0,
            ..PollConfig::default()
        };
        let store = ExportStore::new(transport.clone(), config);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        let seen = drain_until_terminal(&mut sub).await;
        assert_eq!(seen.last().unwrap().error.as_deref(), Some(CONNECTION_LOST_MESSAGE));
        assert!(seen.iter().all(|s| s.retry_count == 0));
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_starting_defers_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_submit_delay(Duration::from_secs(5));
        let store = store_with(&transport);

        let pending = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.submit(request("u1")).await }
        });
        while store.status() != ExportStatus::Starting {
            tokio::task::yield_now().await;
        }
        store.stop_polling();
        assert_eq!(store.status(), ExportStatus::Starting);

        assert_eq!(pending.await.unwrap(), Ok("tok-1".to_string()));
        assert_eq!(store.status(), ExportStatus::Exporting);
        assert!(!store.is_polling());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.poll_count(), 0);

        assert!(store.start_polling("tok-1"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.poll_count() >= 1);

        // The hold does not carry over to the next submission.
        store.reset();
        transport.set_submit_delay(Duration::ZERO);
        store.submit(request("u2")).await.unwrap();
        assert!(store.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_submission_cancels_and_releases_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_submit_delay(Duration::from_secs(5));
        let store = store_with(&transport);

        let pending = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.submit(request("u1")).await }
        });
        while store.status() != ExportStatus::Starting {
            tokio::task::yield_now().await;
        }
        store.reset();

        assert_eq!(pending.await.unwrap(), Err(SubmissionError::Cancelled));
        assert_eq!(store.status(), ExportStatus::Idle);
        assert!(!store.is_polling());
        transport.settle().await;
        assert!(transport
            .cleanups()
            .contains(&CleanupTarget::Export("tok-1".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_network_failure_then_retry() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_submit(Err(TransportError::Network("offline".into())));
        let store = store_with(&transport);

        let err = store.submit(request("u1")).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Network(_)));
        let snap = store.snapshot();
        assert_eq!(snap.status, ExportStatus::Error);
        assert!(snap.can_retry);
        assert!(!store.is_polling());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.poll_count(), 0);

        let token = store.retry().await.unwrap();
        assert_eq!(token, "tok-1");
        let submits = transport.submits();
        assert_eq!(submits.len(), 2);
        assert_eq!(submits[0], submits[1]);
    }

    #[tokio::test]
    async fn test_success_without_token_is_submission_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_submit(Ok(SubmitResponse { export_token: None }));
        let store = store_with(&transport);

        assert_eq!(
            store.submit(request("u1")).await,
            Err(SubmissionError::MissingToken)
        );
        let snap = store.snapshot();
        assert_eq!(snap.status, ExportStatus::Error);
        assert_eq!(
            snap.error.as_deref(),
            Some("Render service did not return an export token")
        );
        assert!(!store.is_polling());
    }

    #[tokio::test]
    async fn test_invalid_request_has_no_side_effects() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);
        let mut req = request("u1");
        req.segments.clear();

        assert!(matches!(
            store.submit(req).await,
            Err(SubmissionError::Invalid(_))
        ));
        assert_eq!(store.status(), ExportStatus::Idle);
        assert!(transport.submits().is_empty());
        assert_eq!(store.retry().await, Err(SubmissionError::NothingToRetry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_after_complete() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Ok(ExportProgress::complete()));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        sub.settled().await;
        let artifact = store.artifact().unwrap();
        assert_eq!(artifact.token, "tok-1");
        assert_eq!(
            artifact.download_url,
            "http://render.test/api/exports/tok-1/download"
        );

        store.invalidate();
        let snap = store.snapshot();
        assert_eq!(snap.status, ExportStatus::Idle);
        assert_eq!(snap.token, None);
        assert_eq!(store.artifact(), None);

        transport.settle().await;
        // The upload is still being edited; only the job is released.
        assert_eq!(
            transport.cleanups(),
            vec![CleanupTarget::Export("tok-1".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmit_after_complete_supersedes_old_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_poll(Ok(ExportProgress::complete()));
        let store = store_with(&transport);
        let mut sub = store.subscribe();

        store.submit(request("u1")).await.unwrap();
        sub.settled().await;
        let token = store.submit(request("u1")).await.unwrap();
        assert_eq!(token, "tok-2");
        assert_eq!(store.snapshot().token.as_deref(), Some("tok-2"));
        assert_eq!(store.artifact(), None);

        transport.settle().await;
        assert_eq!(
            transport.cleanups(),
            vec![CleanupTarget::Export("tok-1".into())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_does_not_stop_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);

        let a = store.subscribe();
        let b = store.subscribe();
        assert_eq!(store.subscriber_count(), 2);

        store.submit(request("u1")).await.unwrap();
        a.unsubscribe();
        drop(b);
        assert_eq!(store.subscriber_count(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(store.is_polling());
        assert!(transport.poll_count() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polling_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);
        store.submit(request("u1")).await.unwrap();

        assert!(store.start_polling("tok-1"));
        assert!(store.start_polling("tok-1"));
        assert!(!store.start_polling("tok-other"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(transport.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_then_restart_polling() {
        let transport = Arc::new(ScriptedTransport::new());
        let store = store_with(&transport);
        store.submit(request("u1")).await.unwrap();

        store.stop_polling();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.poll_count(), 0);
        assert_eq!(store.status(), ExportStatus::Exporting);

        assert!(store.start_polling("tok-1"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.poll_count() >= 1);
    }
}
