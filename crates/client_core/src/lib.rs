use std::fmt;

use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode, Url};
use shared::{
    domain::JobId,
    protocol::{StatusResponse, UploadResponse, API_SEGMENTS, UPLOAD_FIELD},
};
use thiserror::Error;
use tracing::{debug, info};

pub mod config;
pub mod flow;
pub mod image;
pub mod notify;
pub mod poller;
pub mod render;

pub use config::{load_config, ClientConfig};
pub use flow::{DownloadLink, FlowError, FlowEvent, FlowView, UploadFlowController};
pub use image::{ImageError, SelectedImage};
pub use notify::{Notification, Notifier, DEFAULT_TOAST_TTL};
pub use poller::{poll_until_terminal, PollOutcome, PollSettings, DEFAULT_POLL_INTERVAL};
pub use render::{render_mermaid, RenderError, RenderedDiagram};

/// Which backend call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStage {
    Upload,
    StartProcessing,
    Status,
    Mermaid,
    Png,
}

impl fmt::Display for ApiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::StartProcessing => "start processing",
            Self::Status => "status check",
            Self::Mermaid => "mermaid download",
            Self::Png => "png download",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum JobApiError {
    #[error("{stage} request failed: {source}")]
    Transport {
        stage: ApiStage,
        #[source]
        source: reqwest::Error,
    },
    #[error("{stage} returned HTTP {status}")]
    Status { stage: ApiStage, status: StatusCode },
    #[error("{stage} response could not be decoded: {source}")]
    Decode {
        stage: ApiStage,
        #[source]
        source: reqwest::Error,
    },
    #[error("upload response did not include a job id")]
    MissingJobId,
}

impl JobApiError {
    pub fn stage(&self) -> ApiStage {
        match self {
            Self::Transport { stage, .. } | Self::Status { stage, .. } | Self::Decode { stage, .. } => {
                *stage
            }
            Self::MissingJobId => ApiStage::Upload,
        }
    }

    fn from_send(stage: ApiStage, source: reqwest::Error) -> Self {
        match source.status() {
            Some(status) => Self::Status { stage, status },
            None => Self::Transport { stage, source },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Mermaid,
    Png,
}

/// The job backend as seen by the upload flow.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn upload_image(&self, image: &SelectedImage) -> Result<JobId, JobApiError>;
    async fn start_processing(&self, job_id: &JobId) -> Result<(), JobApiError>;
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusResponse, JobApiError>;
    async fn fetch_mermaid(&self, job_id: &JobId) -> Result<String, JobApiError>;
    /// Existence check for the server-rendered PNG. Any failure reads as
    /// "not available".
    async fn probe_png(&self, job_id: &JobId) -> bool;
    async fn fetch_png(&self, job_id: &JobId) -> Result<Vec<u8>, JobApiError>;
    fn result_url(&self, job_id: &JobId, kind: ResultKind) -> String;
}

#[derive(Debug, Error)]
#[error("invalid server url '{0}'")]
pub struct InvalidServerUrl(pub String);

pub struct HttpJobApi {
    http: Client,
    server_url: String,
    base: Url,
}

impl HttpJobApi {
    pub fn new(server_url: impl Into<String>) -> Result<Self, InvalidServerUrl> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(
        http: Client,
        server_url: impl Into<String>,
    ) -> Result<Self, InvalidServerUrl> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&server_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| InvalidServerUrl(server_url.clone()))?;
        Ok(Self {
            http,
            server_url,
            base,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Appends `/api/v1/...` to the base URL. Each segment is escaped on its
    /// own, so a job id can never add path segments, a query or a fragment.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(API_SEGMENTS).extend(segments);
        }
        url
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn upload_image(&self, image: &SelectedImage) -> Result<JobId, JobApiError> {
        let part = multipart::Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name().to_string())
            .mime_str(image.mime_type())
            .map_err(|source| JobApiError::Transport {
                stage: ApiStage::Upload,
                source,
            })?;
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);

        let response: UploadResponse = self
            .http
            .post(self.endpoint(["upload"]))
            .multipart(form)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| JobApiError::from_send(ApiStage::Upload, e))?
            .json()
            .await
            .map_err(|source| JobApiError::Decode {
                stage: ApiStage::Upload,
                source,
            })?;

        let job_id = response
            .job_id
            .filter(JobId::is_usable)
            .ok_or(JobApiError::MissingJobId)?;
        info!(%job_id, file = image.file_name(), bytes = image.len(), "uploaded image");
        Ok(job_id)
    }

    async fn start_processing(&self, job_id: &JobId) -> Result<(), JobApiError> {
        self.http
            .post(self.endpoint(["process", job_id.as_str()]))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| JobApiError::from_send(ApiStage::StartProcessing, e))?;
        info!(%job_id, "processing requested");
        Ok(())
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusResponse, JobApiError> {
        let status: StatusResponse = self
            .http
            .get(self.endpoint(["status", job_id.as_str()]))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| JobApiError::from_send(ApiStage::Status, e))?
            .json()
            .await
            .map_err(|source| JobApiError::Decode {
                stage: ApiStage::Status,
                source,
            })?;
        debug!(%job_id, status = %status.status, "status polled");
        Ok(status)
    }

    async fn fetch_mermaid(&self, job_id: &JobId) -> Result<String, JobApiError> {
        self.http
            .get(self.endpoint(["results", job_id.as_str(), "mermaid"]))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| JobApiError::from_send(ApiStage::Mermaid, e))?
            .text()
            .await
            .map_err(|source| JobApiError::Decode {
                stage: ApiStage::Mermaid,
                source,
            })
    }

    async fn probe_png(&self, job_id: &JobId) -> bool {
        match self
            .http
            .head(self.endpoint(["results", job_id.as_str(), "png"]))
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(error) => {
                debug!(%job_id, %error, "png probe failed; treating as unavailable");
                false
            }
        }
    }

    async fn fetch_png(&self, job_id: &JobId) -> Result<Vec<u8>, JobApiError> {
        let bytes = self
            .http
            .get(self.endpoint(["results", job_id.as_str(), "png"]))
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| JobApiError::from_send(ApiStage::Png, e))?
            .bytes()
            .await
            .map_err(|source| JobApiError::Decode {
                stage: ApiStage::Png,
                source,
            })?;
        Ok(bytes.to_vec())
    }

    fn result_url(&self, job_id: &JobId, kind: ResultKind) -> String {
        match kind {
            ResultKind::Mermaid => self.endpoint(["results", job_id.as_str(), "mermaid"]).into(),
            ResultKind::Png => self.endpoint(["results", job_id.as_str(), "png"]).into(),
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
