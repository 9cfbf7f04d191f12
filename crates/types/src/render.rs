// crates/types/src/render.rs
//! The render request submitted for a subtitle burn-in export.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// One timed subtitle line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct SubtitleSegment {
    pub id: u32,
    /// Seconds from the start of the clip.
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl SubtitleSegment {
    pub fn new(id: u32, start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            id,
            start_time,
            end_time,
            text: text.into(),
        }
    }
}

/// Output frame size requested from the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Everything the render service needs to burn subtitles into an upload.
///
/// `style`, `height` and `quality` are user preferences forwarded verbatim;
/// the client never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub upload_id: String,
    pub segments: Vec<SubtitleSegment>,
    #[serde(default)]
    pub style: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resolution: Option<Resolution>,
}

impl RenderRequest {
    pub fn new(upload_id: impl Into<String>, segments: Vec<SubtitleSegment>) -> Self {
        Self {
            upload_id: upload_id.into(),
            segments,
            style: "standard".into(),
            height: "bottom".into(),
            quality: "normal".into(),
            locale: "de-DE".into(),
            target_resolution: None,
        }
    }

    /// Check the preconditions for submission.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.upload_id.trim().is_empty() {
            return Err(ValidationError::MissingUpload);
        }
        if self.segments.is_empty() {
            return Err(ValidationError::NoSegments);
        }
        for seg in &self.segments {
            if !seg.start_time.is_finite() || seg.start_time < 0.0 {
                return Err(ValidationError::InvalidTiming { id: seg.id });
            }
            if !seg.end_time.is_finite() || seg.end_time <= seg.start_time {
                return Err(ValidationError::InvalidTiming { id: seg.id });
            }
            if seg.text.trim().is_empty() {
                return Err(ValidationError::EmptyText { id: seg.id });
            }
        }
        if let Some(res) = self.target_resolution {
            if res.width == 0 || res.height == 0 {
                return Err(ValidationError::InvalidResolution);
            }
        }
        Ok(())
    }
}

/// Why a render request cannot be submitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No upload selected")]
    MissingUpload,

    #[error("No subtitle segments to render")]
    NoSegments,

    #[error("Segment {id} has invalid timing")]
    InvalidTiming { id: u32 },

    #[error("Segment {id} has no text")]
    EmptyText { id: u32 },

    #[error("Target resolution must be non-zero")]
    InvalidResolution,
}
