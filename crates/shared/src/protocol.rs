use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::JobId;

pub const API_PREFIX: &str = "/api/v1";
/// `API_PREFIX` split into path segments, for URL builders.
pub const API_SEGMENTS: [&str; 2] = ["api", "v1"];
pub const UPLOAD_FIELD: &str = "file";

/// Body of `POST /api/v1/upload`. Only `job_id` is required by the client;
/// the rest is informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

/// Body of `POST /api/v1/process/{job_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub job_id: JobId,
    pub status: String,
}

/// Body of `GET /api/v1/status/{job_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// The helpers below splice the id in verbatim. They suit the UUIDs the stub
// backend issues; clients addressing arbitrary ids escape each segment.

pub fn upload_path() -> String {
    format!("{API_PREFIX}/upload")
}

pub fn process_path(job_id: &JobId) -> String {
    format!("{API_PREFIX}/process/{job_id}")
}

pub fn status_path(job_id: &JobId) -> String {
    format!("{API_PREFIX}/status/{job_id}")
}

pub fn mermaid_path(job_id: &JobId) -> String {
    format!("{API_PREFIX}/results/{job_id}/mermaid")
}

pub fn png_path(job_id: &JobId) -> String {
    format!("{API_PREFIX}/results/{job_id}/png")
}
