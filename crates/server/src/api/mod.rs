//! In-memory job table and the canned processing pipeline behind the stub
//! backend. Nothing here looks at the image; every job produces the same
//! three-node flowchart.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use shared::{
    domain::{JobId, STATUS_COMPLETED},
    error::{ApiException, ErrorCode},
    protocol::StatusResponse,
};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub const STATUS_UPLOADED: &str = "uploaded";

/// Statuses a job walks through after processing starts, before completion.
pub const PIPELINE_STAGES: &[&str] = &["queued", "preprocessing", "analyzing", "generating"];

pub const STUB_MERMAID: &str = "flowchart TD\n    N1((Start))\n    N2[Process]\n    N3((End))\n    N1 --> N2\n    N2 --> N3\n";

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: usize,
    pub status: String,
    pub mermaid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl JobStore {
    pub async fn create(&self, file_name: &str, content_type: &str, size_bytes: usize) -> JobId {
        let job_id = JobId::new(Uuid::new_v4().to_string());
        let now = Utc::now();
        let record = JobRecord {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            size_bytes,
            status: STATUS_UPLOADED.to_string(),
            mermaid: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().await.insert(job_id.clone(), record);
        info!(%job_id, file_name, size_bytes, "saved upload");
        job_id
    }

    pub async fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn status(&self, job_id: &JobId) -> Result<StatusResponse, ApiException> {
        let record = self.get(job_id).await.ok_or_else(|| job_not_found(job_id))?;
        Ok(StatusResponse {
            job_id: Some(job_id.clone()),
            status: record.status,
            updated_at: Some(record.updated_at),
        })
    }

    /// Moves an uploaded job into the pipeline. A job can only be started once.
    pub async fn begin(&self, job_id: &JobId) -> Result<(), ApiException> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(job_id).ok_or_else(|| job_not_found(job_id))?;
        if record.status != STATUS_UPLOADED {
            return Err(ApiException::new(
                ErrorCode::Conflict,
                format!("job {job_id} is already {}", record.status),
            ));
        }
        record.status = PIPELINE_STAGES[0].to_string();
        record.updated_at = Utc::now();
        info!(
            %job_id,
            file_name = %record.file_name,
            content_type = %record.content_type,
            size_bytes = record.size_bytes,
            "processing started"
        );
        Ok(())
    }

    async fn set_status(&self, job_id: &JobId, status: &str) {
        if let Some(record) = self.jobs.write().await.get_mut(job_id) {
            record.status = status.to_string();
            record.updated_at = Utc::now();
        }
    }

    async fn complete(&self, job_id: &JobId, mermaid: String) {
        if let Some(record) = self.jobs.write().await.get_mut(job_id) {
            record.mermaid = Some(mermaid);
            record.status = STATUS_COMPLETED.to_string();
            record.updated_at = Utc::now();
        }
    }

    /// Drops jobs whose last update is older than `cutoff`; returns how many.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| record.updated_at >= cutoff);
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn mermaid(&self, job_id: &JobId) -> Result<String, ApiException> {
        self.get(job_id)
            .await
            .and_then(|record| record.mermaid)
            .ok_or_else(|| ApiException::not_found("Mermaid code not found"))
    }
}

/// Walks the job through the remaining stages, `step_delay` apart, then
/// stores the canned diagram.
pub async fn run_stub_pipeline(store: JobStore, job_id: JobId, step_delay: Duration) {
    for stage in PIPELINE_STAGES.iter().skip(1) {
        tokio::time::sleep(step_delay).await;
        store.set_status(&job_id, stage).await;
    }
    tokio::time::sleep(step_delay).await;
    store.complete(&job_id, STUB_MERMAID.to_string()).await;
    info!(%job_id, "stub pipeline completed");
}

/// Periodically forgets jobs idle for longer than `ttl`, so the table stays
/// bounded on a long-running dev server.
pub async fn sweep_expired_jobs(store: JobStore, ttl: Duration) {
    let Ok(ttl_delta) = TimeDelta::from_std(ttl) else {
        return;
    };
    let period = ttl.clamp(Duration::from_millis(10), Duration::from_secs(60));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let removed = store.prune_older_than(Utc::now() - ttl_delta).await;
        if removed > 0 {
            let remaining = store.len().await;
            info!(removed, remaining, "expired jobs pruned");
        }
    }
}

pub fn job_not_found(job_id: &JobId) -> ApiException {
    ApiException::not_found(format!("job {job_id} not found"))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
