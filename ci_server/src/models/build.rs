//! A workflow run triggered by a webhook or manually.

use chrono::{DateTime, Utc};
use ci_core::RunReport;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub repo: String,
    pub commit_sha: String,
    pub branch: String,
    pub pr_number: Option<u64>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub fingerprint: String,
    pub trigger_event: String,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Set when the build failed before the workflow could run.
    pub error: Option<String>,
    pub report: Option<RunReport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBuild {
    pub repo: String,
    pub commit_sha: String,
    pub branch: String,
    pub pr_number: Option<u64>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub fingerprint: String,
    pub trigger_event: String,
}
