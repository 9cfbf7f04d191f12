// crates/core/src/wizard.rs
//! The subtitle editing wizard.
//!
//! `select -> mode-select -> cut | auto-processing -> edit -> success`
//!
//! Every step change the user causes is pushed to [`NavigationHistory`].
//! Back/forward navigation goes through [`WizardController::on_history_pop`],
//! which only re-enters a step and never repeats a side effect such as
//! submitting an export.

use std::sync::Arc;

use subtitler_types::{RenderRequest, SubtitleSegment, WizardStep};
use tracing::{debug, info, warn};

use crate::cleanup::CleanupReason;
use crate::error::WizardError;
use crate::export::{ExportStatus, ExportStore};
use crate::platform::{NavigationHistory, UnloadSignal};
use crate::transport::CleanupTarget;

/// How the user wants to produce subtitles for the selected upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Trim the clip by hand, then edit subtitles.
    Manual,
    /// Let the server cut and subtitle the clip.
    Automatic,
    /// Keep the clip as is and go straight to subtitle editing.
    SubtitleOnly,
}

pub struct WizardController<H: NavigationHistory, U: UnloadSignal> {
    step: WizardStep,
    store: Arc<ExportStore>,
    history: H,
    unload: U,
    draft: Option<RenderRequest>,
    mode: Option<EditMode>,
    preview_running: bool,
    auto_finished: bool,
    last_error: Option<String>,
}

impl<H: NavigationHistory, U: UnloadSignal> WizardController<H, U> {
    pub fn new(store: Arc<ExportStore>, mut history: H, unload: U) -> Self {
        history.replace(WizardStep::Select);
        Self {
            step: WizardStep::Select,
            store,
            history,
            unload,
            draft: None,
            mode: None,
            preview_running: false,
            auto_finished: false,
            last_error: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> Option<&RenderRequest> {
        self.draft.as_ref()
    }

    pub fn mode(&self) -> Option<EditMode> {
        self.mode
    }

    pub fn is_preview_running(&self) -> bool {
        self.preview_running
    }

    /// Last failure shown to the user, from automatic processing or export.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn store(&self) -> &Arc<ExportStore> {
        &self.store
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut H {
        &mut self.history
    }

    fn expect_step(&self, expected: WizardStep, action: &'static str) -> Result<(), WizardError> {
        if self.step == expected {
            Ok(())
        } else {
            Err(WizardError::InvalidTransition {
                from: self.step,
                action,
            })
        }
    }

    fn go(&mut self, to: WizardStep) {
        if self.step == to {
            return;
        }
        info!(from = %self.step, to = %to, "wizard step");
        self.step = to;
        self.history.push(to);
    }

    fn has_result(&self) -> bool {
        self.auto_finished || self.store.status() == ExportStatus::Complete
    }

    // -- Forward transitions --------------------------------------------------

    /// Pick the upload to work on, with its transcribed segments.
    pub fn select_upload(
        &mut self,
        upload_id: impl Into<String>,
        segments: Vec<SubtitleSegment>,
    ) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Select, "select an upload")?;
        let upload_id = upload_id.into();
        if upload_id.trim().is_empty() {
            return Err(WizardError::NoUpload);
        }
        self.draft = Some(RenderRequest::new(upload_id, segments));
        self.mode = None;
        self.auto_finished = false;
        self.last_error = None;
        self.go(WizardStep::ModeSelect);
        Ok(())
    }

    /// `Manual` opens the cutter, `Automatic` hands off to server-side
    /// processing and `SubtitleOnly` submits the export right away.
    pub async fn choose_mode(&mut self, mode: EditMode) -> Result<(), WizardError> {
        self.expect_step(WizardStep::ModeSelect, "choose a mode")?;
        if self.draft.is_none() {
            return Err(WizardError::NoUpload);
        }
        self.mode = Some(mode);
        self.last_error = None;
        match mode {
            EditMode::Manual => self.go(WizardStep::Cut),
            EditMode::Automatic => self.go(WizardStep::AutoProcessing),
            EditMode::SubtitleOnly => {
                self.go(WizardStep::Edit);
                self.submit_draft().await?;
            }
        }
        Ok(())
    }

    pub fn request_preview(&mut self) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Cut, "request a preview")?;
        debug!("cut preview started");
        self.preview_running = true;
        Ok(())
    }

    pub fn finish_preview(&mut self) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Cut, "finish a preview")?;
        debug!("cut preview finished");
        self.preview_running = false;
        Ok(())
    }

    /// Accept the cut and move on to subtitle editing with the segments that
    /// survived it.
    pub fn confirm_cut(&mut self, segments: Vec<SubtitleSegment>) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Cut, "confirm the cut")?;
        if self.preview_running {
            return Err(WizardError::PreviewRunning);
        }
        let draft = self.draft.as_mut().ok_or(WizardError::NoUpload)?;
        draft.segments = segments;
        self.go(WizardStep::Edit);
        Ok(())
    }

    pub fn finish_auto_processing(&mut self, result: Result<(), String>) -> Result<(), WizardError> {
        self.expect_step(WizardStep::AutoProcessing, "finish automatic processing")?;
        match result {
            Ok(()) => {
                self.auto_finished = true;
                self.go(WizardStep::Success);
            }
            Err(message) => {
                warn!(%message, "automatic processing failed");
                self.last_error = Some(message);
                self.go(WizardStep::ModeSelect);
            }
        }
        Ok(())
    }

    pub fn update_segments(&mut self, segments: Vec<SubtitleSegment>) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Edit, "edit subtitles")?;
        let draft = self.draft.as_mut().ok_or(WizardError::NoUpload)?;
        draft.segments = segments;
        Ok(())
    }

    /// Submit the current draft. The step stays `Edit` until
    /// [`reconcile`](Self::reconcile) sees the export complete.
    pub async fn export(&mut self) -> Result<String, WizardError> {
        self.expect_step(WizardStep::Edit, "export")?;
        self.submit_draft().await
    }

    async fn submit_draft(&mut self) -> Result<String, WizardError> {
        let draft = self.draft.clone().ok_or(WizardError::NoUpload)?;
        match self.store.submit(draft).await {
            Ok(token) => {
                self.last_error = None;
                Ok(token)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Fold the export job's state into the wizard. Call on every snapshot.
    pub fn reconcile(&mut self) -> WizardStep {
        let snapshot = self.store.snapshot();
        if self.step == WizardStep::Edit {
            match snapshot.status {
                ExportStatus::Complete => self.go(WizardStep::Success),
                ExportStatus::Error => self.last_error = snapshot.error,
                _ => {}
            }
        }
        self.step
    }

    // -- Backward transitions -------------------------------------------------

    /// Leave the result screen to change subtitles. The finished export no
    /// longer matches the draft, so it is discarded.
    pub fn edit_again(&mut self) -> Result<(), WizardError> {
        self.expect_step(WizardStep::Success, "edit again")?;
        self.store.invalidate();
        self.auto_finished = false;
        self.go(WizardStep::Edit);
        Ok(())
    }

    /// Start over from any step. Releases the upload and any export.
    pub fn reset(&mut self) {
        self.store.reset();
        if let Some(draft) = self.draft.take() {
            self.store
                .cleanup()
                .release(CleanupTarget::Upload(draft.upload_id), CleanupReason::Reset);
        }
        self.mode = None;
        self.preview_running = false;
        self.auto_finished = false;
        self.last_error = None;
        self.go(WizardStep::Select);
    }

    // -- Platform events ------------------------------------------------------

    /// Back/forward navigation landed on the entry keyed `state`.
    pub fn on_history_pop(&mut self, state: Option<&str>) -> WizardStep {
        let mut target = WizardStep::from_history_key(state);
        let mut corrected = false;

        if target != WizardStep::Select && self.draft.is_none() {
            target = WizardStep::Select;
            corrected = true;
        }
        if target == WizardStep::Success && !self.has_result() {
            target = WizardStep::Edit;
            corrected = true;
        }
        if target == WizardStep::Edit && self.step == WizardStep::Success {
            self.auto_finished = false;
        }
        if target == WizardStep::Edit && self.store.status() == ExportStatus::Complete {
            self.store.invalidate();
        }
        if target != WizardStep::Cut {
            self.preview_running = false;
        }

        debug!(from = %self.step, to = %target, corrected, "history pop");
        self.step = target;
        if corrected {
            self.history.replace(target);
        }
        target
    }

    /// The host is going away. Fires cleanup for resources that would
    /// otherwise be orphaned. Returns how many signals were queued.
    pub fn on_unload(&self) -> usize {
        let Some(draft) = &self.draft else {
            return 0;
        };
        if self.has_result() {
            return 0;
        }
        let cleanup = self.store.cleanup();
        let mut targets = vec![CleanupTarget::Upload(draft.upload_id.clone())];
        if let Some(token) = self.store.snapshot().token {
            targets.push(CleanupTarget::Export(token));
        }
        let queued = targets
            .into_iter()
            .filter(|t| cleanup.release_on_unload(t.clone(), &self.unload))
            .count();
        info!(queued, "unload cleanup dispatched");
        queued
    }
}
