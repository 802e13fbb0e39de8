use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::StatusCode;
use shared::{domain::JobId, protocol::StatusResponse};
use tokio::sync::Mutex;

use crate::{ApiStage, JobApi, JobApiError, ResultKind, SelectedImage};

pub(crate) const JOB: &str = "job-42";

pub(crate) enum UploadBehavior {
    Ok,
    MissingId,
    HttpError(StatusCode),
}

/// In-memory backend that replays a scripted status sequence and records
/// every call it receives.
pub(crate) struct ScriptedApi {
    upload: UploadBehavior,
    start_ok: bool,
    statuses: Mutex<VecDeque<Result<String, StatusCode>>>,
    mermaid: Result<String, StatusCode>,
    png_available: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub(crate) fn completing(statuses: &[&str]) -> Self {
        Self {
            upload: UploadBehavior::Ok,
            start_ok: true,
            statuses: Mutex::new(statuses.iter().map(|s| Ok(s.to_string())).collect()),
            mermaid: Ok("flowchart TD\n  N1((Start)) --> N2[Process]\n  N2 --> N3((End))\n".into()),
            png_available: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Never reaches a terminal status.
    pub(crate) fn endless() -> Self {
        Self::completing(&[])
    }

    pub(crate) fn with_upload(mut self, upload: UploadBehavior) -> Self {
        self.upload = upload;
        self
    }

    pub(crate) fn with_start_ok(mut self, start_ok: bool) -> Self {
        self.start_ok = start_ok;
        self
    }

    pub(crate) fn with_status_error_after(self, statuses: &[&str], code: StatusCode) -> Self {
        let mut script: VecDeque<_> = statuses.iter().map(|s| Ok(s.to_string())).collect();
        script.push_back(Err(code));
        Self {
            statuses: Mutex::new(script),
            ..self
        }
    }

    pub(crate) fn with_mermaid(mut self, mermaid: Result<String, StatusCode>) -> Self {
        self.mermaid = mermaid;
        self
    }

    pub(crate) fn with_png(mut self, png_available: bool) -> Self {
        self.png_available = png_available;
        self
    }

    pub(crate) async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub(crate) async fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    async fn record(&self, call: impl Into<String>) {
        self.calls.lock().await.push(call.into());
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn upload_image(&self, image: &SelectedImage) -> Result<JobId, JobApiError> {
        self.record(format!("upload:{}", image.file_name())).await;
        match self.upload {
            UploadBehavior::Ok => Ok(JobId::new(JOB)),
            UploadBehavior::MissingId => Err(JobApiError::MissingJobId),
            UploadBehavior::HttpError(status) => Err(JobApiError::Status {
                stage: ApiStage::Upload,
                status,
            }),
        }
    }

    async fn start_processing(&self, job_id: &JobId) -> Result<(), JobApiError> {
        self.record(format!("start:{job_id}")).await;
        if self.start_ok {
            Ok(())
        } else {
            Err(JobApiError::Status {
                stage: ApiStage::StartProcessing,
                status: StatusCode::NOT_FOUND,
            })
        }
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusResponse, JobApiError> {
        self.record(format!("status:{job_id}")).await;
        let next = self.statuses.lock().await.pop_front();
        match next.unwrap_or_else(|| Ok("processing".to_string())) {
            Ok(status) => Ok(StatusResponse {
                job_id: Some(job_id.clone()),
                status,
                updated_at: None,
            }),
            Err(status) => Err(JobApiError::Status {
                stage: ApiStage::Status,
                status,
            }),
        }
    }

    async fn fetch_mermaid(&self, job_id: &JobId) -> Result<String, JobApiError> {
        self.record(format!("mermaid:{job_id}")).await;
        self.mermaid.clone().map_err(|status| JobApiError::Status {
            stage: ApiStage::Mermaid,
            status,
        })
    }

    async fn probe_png(&self, job_id: &JobId) -> bool {
        self.record(format!("probe_png:{job_id}")).await;
        self.png_available
    }

    async fn fetch_png(&self, job_id: &JobId) -> Result<Vec<u8>, JobApiError> {
        self.record(format!("png:{job_id}")).await;
        if self.png_available {
            Ok(b"\x89PNG".to_vec())
        } else {
            Err(JobApiError::Status {
                stage: ApiStage::Png,
                status: StatusCode::NOT_FOUND,
            })
        }
    }

    fn result_url(&self, job_id: &JobId, kind: ResultKind) -> String {
        match kind {
            ResultKind::Mermaid => format!("mock://results/{job_id}/mermaid"),
            ResultKind::Png => format!("mock://results/{job_id}/png"),
        }
    }
}
