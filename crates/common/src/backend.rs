//! HTTP client for the crowd detection backend.
//!
//! The backend exposes three request/response endpoints alongside its push
//! channel: whole-video analysis, single-frame analysis (used by camera mode)
//! and a listing of previously computed frames.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::analysis::{BackendStatus, FrameRecord, VideoAnalysis};
use crate::frames::FramePayload;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("invalid response from {endpoint}: {source}")]
    InvalidResponse {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl BackendError {
    /// Endpoint path the failed call targeted
    pub fn endpoint(&self) -> &str {
        match self {
            BackendError::Request { endpoint, .. }
            | BackendError::Status { endpoint, .. }
            | BackendError::InvalidResponse { endpoint, .. } => endpoint,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Video payload submitted for whole-run analysis
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Request/response surface of the detection backend
#[async_trait]
pub trait DetectionBackend: Send + Sync {
    /// Submit a complete video; resolves once the run has finished
    async fn analyze_video(&self, upload: VideoUpload) -> BackendResult<VideoAnalysis>;

    /// Submit one JPEG frame and get its per-frame analysis back
    async fn analyze_frame(&self, jpeg: Vec<u8>) -> BackendResult<FramePayload>;

    /// Previously computed frames, in backend order
    async fn list_frames(&self) -> BackendResult<Vec<FrameRecord>>;

    /// Backend liveness probe
    async fn status(&self) -> BackendResult<BackendStatus>;
}

/// `reqwest`-backed implementation of [`DetectionBackend`]
#[derive(Clone)]
pub struct HttpDetectionBackend {
    base_url: String,
    client: Client,
}

impl HttpDetectionBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> BackendResult<reqwest::Response> {
        let response = request.send().await.map_err(|source| BackendError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        debug!(endpoint = endpoint, status = %status, "backend request succeeded");
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> BackendResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|source| BackendError::InvalidResponse {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

#[async_trait]
impl DetectionBackend for HttpDetectionBackend {
    async fn analyze_video(&self, upload: VideoUpload) -> BackendResult<VideoAnalysis> {
        const ENDPOINT: &str = "/detect/";

        let part = Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|source| BackendError::Request {
                endpoint: ENDPOINT.to_string(),
                source,
            })?;
        let form = Form::new().part("video", part);

        let response = self
            .send(ENDPOINT, self.client.post(self.url(ENDPOINT)).multipart(form))
            .await?;
        Self::json(ENDPOINT, response).await
    }

    async fn analyze_frame(&self, jpeg: Vec<u8>) -> BackendResult<FramePayload> {
        const ENDPOINT: &str = "/detect_frame/";

        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .map_err(|source| BackendError::Request {
                endpoint: ENDPOINT.to_string(),
                source,
            })?;
        let form = Form::new().part("image", part);

        let response = self
            .send(ENDPOINT, self.client.post(self.url(ENDPOINT)).multipart(form))
            .await?;
        Self::json(ENDPOINT, response).await
    }

    async fn list_frames(&self) -> BackendResult<Vec<FrameRecord>> {
        const ENDPOINT: &str = "/frames";

        let response = self
            .send(ENDPOINT, self.client.get(self.url(ENDPOINT)))
            .await?;
        Self::json(ENDPOINT, response).await
    }

    async fn status(&self) -> BackendResult<BackendStatus> {
        const ENDPOINT: &str = "/";

        let response = self
            .send(ENDPOINT, self.client.get(self.url(ENDPOINT)))
            .await?;
        Self::json(ENDPOINT, response).await
    }
}
