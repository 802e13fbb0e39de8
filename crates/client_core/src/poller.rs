//! Fixed-interval status polling, stoppable through a cancellation token.

use std::{future::Future, time::Duration};

use shared::domain::{JobId, JobStatus};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{JobApi, JobApiError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    /// `None` polls until a terminal status or an error.
    pub max_duration: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    Completed(JobStatus),
    Failed(String),
    Error(JobApiError),
    TimedOut,
    Cancelled,
}

/// Queries the job status every `settings.interval`, starting one interval
/// after the call, and calls `on_status` with each reading. Returns on the
/// first terminal status, the first request error, the deadline, or
/// cancellation, whichever comes first.
pub async fn poll_until_terminal<F, Fut>(
    api: &dyn JobApi,
    job_id: &JobId,
    settings: &PollSettings,
    cancel: &CancellationToken,
    mut on_status: F,
) -> PollOutcome
where
    F: FnMut(JobStatus) -> Fut,
    Fut: Future<Output = ()>,
{
    let started = Instant::now();
    let deadline = settings.max_duration.map(|limit| started + limit);
    let mut ticker = interval_at(started + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = wait_for_deadline(deadline) => {
                info!(%job_id, attempts, "polling gave up at deadline");
                return PollOutcome::TimedOut;
            }
            _ = ticker.tick() => {}
        }

        attempts += 1;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            response = api.fetch_status(job_id) => response,
        };

        let status = match response {
            Ok(body) => JobStatus::classify(&body.status),
            Err(err) => return PollOutcome::Error(err),
        };
        debug!(%job_id, attempts, status = %status, "poll tick");
        on_status(status.clone()).await;

        if status.is_terminal() {
            return match status {
                JobStatus::Failed(raw) => PollOutcome::Failed(raw),
                status => PollOutcome::Completed(status),
            };
        }
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "tests/poller_tests.rs"]
mod tests;
