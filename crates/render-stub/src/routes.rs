use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::time::Instant;
use subtitler_types::{ExportProgress, RenderRequest, SubmitResponse};
use tracing::info;

use crate::error::StubError;
use crate::state::{artifact_bytes, RenderJob, StubState};

/// Simulated wall-clock seconds per progress step, for `timeRemaining`.
const SECONDS_PER_STEP: f64 = 2.0;

/// POST /api/exports: queue a render job.
pub async fn create_export(
    State(state): State<StubState>,
    Json(req): Json<RenderRequest>,
) -> Result<Json<SubmitResponse>, StubError> {
    req.validate()
        .map_err(|e| StubError::BadRequest(e.to_string()))?;

    let token = uuid::Uuid::new_v4().to_string();
    state.jobs.insert(
        token.clone(),
        RenderJob {
            upload_id: req.upload_id.clone(),
            progress: 0,
            segments: req.segments.len(),
            created_at: Instant::now(),
        },
    );
    info!(%token, upload_id = %req.upload_id, segments = req.segments.len(), "export queued");
    Ok(Json(SubmitResponse::new(token)))
}

/// GET /api/exports/{token}/progress: advance the job one step and report.
pub async fn export_progress(
    State(state): State<StubState>,
    Path(token): Path<String>,
) -> Result<Json<ExportProgress>, StubError> {
    let mut job = state
        .jobs
        .get_mut(&token)
        .ok_or_else(|| StubError::ExportNotFound(token.clone()))?;

    if job.will_fail() {
        info!(%token, "simulated render failure");
        return Ok(Json(ExportProgress::failed(format!(
            "Render failed: upload {} could not be decoded",
            job.upload_id
        ))));
    }
    if job.is_complete() {
        return Ok(Json(ExportProgress::complete()));
    }

    job.progress = job.progress.saturating_add(state.step).min(100);
    if job.is_complete() {
        info!(%token, elapsed_ms = job.created_at.elapsed().as_millis() as u64, "export complete");
        return Ok(Json(ExportProgress::complete()));
    }

    let steps_left = f64::from(100 - job.progress) / f64::from(state.step);
    Ok(Json(ExportProgress::exporting(
        f64::from(job.progress),
        Some((steps_left.ceil() * SECONDS_PER_STEP).max(0.0)),
    )))
}

/// GET /api/exports/{token}/download: the rendered file, once complete.
pub async fn download_export(
    State(state): State<StubState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, StubError> {
    let job = state
        .jobs
        .get(&token)
        .ok_or_else(|| StubError::ExportNotFound(token.clone()))?;
    if !job.is_complete() || job.will_fail() {
        return Err(StubError::NotReady(token));
    }
    let bytes = artifact_bytes(&token, &job.upload_id);
    Ok(([(header::CONTENT_TYPE, "video/mp4")], bytes))
}

/// DELETE /api/exports/{token}: drop the job. Idempotent.
pub async fn delete_export(
    State(state): State<StubState>,
    Path(token): Path<String>,
) -> StatusCode {
    let existed = state.jobs.remove(&token).is_some();
    state.deleted_exports.insert(token.clone());
    info!(%token, existed, "export released");
    StatusCode::NO_CONTENT
}

/// DELETE /api/uploads/{id}: forget an upload. Idempotent.
pub async fn delete_upload(
    State(state): State<StubState>,
    Path(upload_id): Path<String>,
) -> StatusCode {
    state.deleted_uploads.insert(upload_id.clone());
    info!(%upload_id, "upload released");
    StatusCode::NO_CONTENT
}
