//! In-process fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use subtitler_types::{ExportProgress, RenderRequest, SubmitResponse, SubtitleSegment};
use tokio::time::Instant;

use crate::error::TransportError;
use crate::platform::UnloadSignal;
use crate::transport::{CleanupTarget, ExportTransport};

pub fn request(upload_id: &str) -> RenderRequest {
    RenderRequest::new(
        upload_id,
        vec![
            SubtitleSegment::new(1, 0.0, 2.0, "Klimaschutz jetzt"),
            SubtitleSegment::new(2, 2.0, 4.5, "Für alle"),
        ],
    )
}

/// Transport whose responses are queued up front.
///
/// With empty queues, submissions hand out `tok-1`, `tok-2`, ... and polls
/// report `exporting` at 0%.
#[derive(Default)]
pub struct ScriptedTransport {
    submit_script: Mutex<VecDeque<Result<SubmitResponse, TransportError>>>,
    poll_script: Mutex<VecDeque<Result<ExportProgress, TransportError>>>,
    token_polls: Mutex<HashMap<String, VecDeque<Result<ExportProgress, TransportError>>>>,
    submit_delay: Mutex<Duration>,
    poll_delay: Mutex<Duration>,
    submits: Mutex<Vec<RenderRequest>>,
    polls: Mutex<Vec<(String, Instant)>>,
    cleanups: Mutex<Vec<CleanupTarget>>,
    fail_cleanups: AtomicBool,
    next_token: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_submit(&self, result: Result<SubmitResponse, TransportError>) {
        self.submit_script.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, result: Result<ExportProgress, TransportError>) {
        self.poll_script.lock().unwrap().push_back(result);
    }

    /// Queue a poll result that only `token` receives. Takes precedence over
    /// the shared queue.
    pub fn push_poll_for(&self, token: &str, result: Result<ExportProgress, TransportError>) {
        self.token_polls
            .lock()
            .unwrap()
            .entry(token.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = delay;
    }

    pub fn fail_cleanups(&self) {
        self.fail_cleanups.store(true, Ordering::Relaxed);
    }

    pub fn submits(&self) -> Vec<RenderRequest> {
        self.submits.lock().unwrap().clone()
    }

    pub fn polls(&self) -> Vec<(String, Instant)> {
        self.polls.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        self.polls.lock().unwrap().len()
    }

    pub fn cleanups(&self) -> Vec<CleanupTarget> {
        self.cleanups.lock().unwrap().clone()
    }

    /// Let detached tasks (cleanup, unload) run to completion.
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ExportTransport for ScriptedTransport {
    async fn submit(&self, request: &RenderRequest) -> Result<SubmitResponse, TransportError> {
        self.submits.lock().unwrap().push(request.clone());
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.submit_script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(SubmitResponse::new(format!("tok-{n}")))
        })
    }

    async fn poll(&self, token: &str) -> Result<ExportProgress, TransportError> {
        self.polls
            .lock()
            .unwrap()
            .push((token.to_string(), Instant::now()));
        let delay = *self.poll_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let for_token = self
            .token_polls
            .lock()
            .unwrap()
            .get_mut(token)
            .and_then(VecDeque::pop_front);
        let scripted = for_token.or_else(|| self.poll_script.lock().unwrap().pop_front());
        scripted.unwrap_or_else(|| Ok(ExportProgress::exporting(0.0, None)))
    }

    async fn download(&self, token: &str) -> Result<Bytes, TransportError> {
        Ok(Bytes::from(format!("video:{token}")))
    }

    async fn cleanup(&self, target: &CleanupTarget) -> Result<(), TransportError> {
        self.cleanups.lock().unwrap().push(target.clone());
        if self.fail_cleanups.load(Ordering::Relaxed) {
            return Err(TransportError::Network("connection refused".into()));
        }
        Ok(())
    }

    fn download_url(&self, token: &str) -> String {
        format!("http://render.test/api/exports/{token}/download")
    }
}

/// Unload signal that only records what it was asked to send.
#[derive(Default)]
pub struct RecordingUnload {
    dispatched: Mutex<Vec<CleanupTarget>>,
}

impl RecordingUnload {
    pub fn dispatched(&self) -> Vec<CleanupTarget> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl UnloadSignal for RecordingUnload {
    fn dispatch(&self, target: &CleanupTarget) -> bool {
        self.dispatched.lock().unwrap().push(target.clone());
        true
    }
}
