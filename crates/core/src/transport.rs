//! The seam between the orchestrator and the render service.

use async_trait::async_trait;
use bytes::Bytes;
use subtitler_types::{ExportProgress, RenderRequest, SubmitResponse};

use crate::error::TransportError;

/// A server-side resource the client may ask to release.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CleanupTarget {
    /// An uploaded source video.
    Upload(String),
    /// A render job, addressed by its export token.
    Export(String),
}

impl CleanupTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Upload(id) | Self::Export(id) => id,
        }
    }

    /// Path of the cleanup endpoint, relative to the service base URL.
    pub fn path(&self) -> String {
        match self {
            Self::Upload(id) => format!("/api/uploads/{}", urlencoding::encode(id)),
            Self::Export(token) => format!("/api/exports/{}", urlencoding::encode(token)),
        }
    }
}

impl std::fmt::Display for CleanupTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload(id) => write!(f, "upload:{id}"),
            Self::Export(token) => write!(f, "export:{token}"),
        }
    }
}

/// HTTP contract of the render service.
///
/// Implementations:
/// - `HttpTransport`: reqwest client against a real service
/// - in-process fakes in tests
#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// `POST /api/exports`.
    async fn submit(&self, request: &RenderRequest) -> Result<SubmitResponse, TransportError>;

    /// `GET /api/exports/{token}/progress`.
    async fn poll(&self, token: &str) -> Result<ExportProgress, TransportError>;

    /// `GET /api/exports/{token}/download`.
    async fn download(&self, token: &str) -> Result<Bytes, TransportError>;

    /// `DELETE` on the target's cleanup endpoint. Must succeed when the
    /// resource is already gone.
    async fn cleanup(&self, target: &CleanupTarget) -> Result<(), TransportError>;

    /// Absolute URL the artifact can be fetched from.
    fn download_url(&self, token: &str) -> String;
}
