use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque job identifier issued by the backend on upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An id that is empty or only whitespace cannot address a job.
    pub fn is_usable(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_COMPLETED_WITH_WARNINGS: &str = "completed_with_warnings";
pub const STATUS_FAILED_PREFIX: &str = "failed";

/// Client-side reading of a raw backend status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    InProgress(String),
    Completed,
    CompletedWithWarnings,
    Failed(String),
}

impl JobStatus {
    pub fn classify(raw: &str) -> Self {
        if raw == STATUS_COMPLETED {
            Self::Completed
        } else if raw == STATUS_COMPLETED_WITH_WARNINGS {
            Self::CompletedWithWarnings
        } else if raw.starts_with(STATUS_FAILED_PREFIX) {
            Self::Failed(raw.to_string())
        } else {
            Self::InProgress(raw.to_string())
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithWarnings)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => STATUS_COMPLETED,
            Self::CompletedWithWarnings => STATUS_COMPLETED_WITH_WARNINGS,
            Self::InProgress(raw) | Self::Failed(raw) => raw,
        }
    }

    /// Human readable form used in the status line: the first underscore
    /// becomes a space, the rest are left alone.
    pub fn display_label(&self) -> String {
        self.as_str().replacen('_', " ", 1)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three mutually exclusive sections of the upload flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowStep {
    #[default]
    Upload,
    Processing,
    Result,
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::Processing => "processing",
            Self::Result => "result",
        };
        f.write_str(name)
    }
}
