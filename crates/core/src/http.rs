// crates/core/src/http.rs
//! reqwest-backed [`ExportTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode};
use subtitler_types::{ErrorResponse, ExportProgress, RenderRequest, SubmitResponse};

use crate::config::ExportConfig;
use crate::error::{ConfigError, TransportError};
use crate::transport::{CleanupTarget, ExportTransport};

/// Talks to the render service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ExportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn export_url(&self, token: &str, suffix: &str) -> String {
        self.url(&format!("/api/exports/{}/{}", urlencoding::encode(token), suffix))
    }
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Turn a non-2xx response into a [`TransportError`], preferring the
/// service's `{"error": ...}` body for the message.
async fn error_for_status(resp: Response) -> TransportError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => err.error,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => TransportError::NotFound(message),
        _ => TransportError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ExportTransport for HttpTransport {
    async fn submit(&self, request: &RenderRequest) -> Result<SubmitResponse, TransportError> {
        let resp = self
            .client
            .post(self.url("/api/exports"))
            .json(request)
            .send()
            .await
            .map_err(map_send_error)?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        resp.json::<SubmitResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn poll(&self, token: &str) -> Result<ExportProgress, TransportError> {
        let resp = self
            .client
            .get(self.export_url(token, "progress"))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(map_send_error)?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        resp.json::<ExportProgress>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }

    async fn download(&self, token: &str) -> Result<Bytes, TransportError> {
        let resp = self
            .client
            .get(self.download_url(token))
            .send()
            .await
            .map_err(map_send_error)?;
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        resp.bytes().await.map_err(map_send_error)
    }

    async fn cleanup(&self, target: &CleanupTarget) -> Result<(), TransportError> {
        let resp = self
            .client
            .delete(self.url(&target.path()))
            .send()
            .await
            .map_err(map_send_error)?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(());
        }
        Err(error_for_status(resp).await)
    }

    fn download_url(&self, token: &str) -> String {
        self.export_url(token, "download")
    }
}
