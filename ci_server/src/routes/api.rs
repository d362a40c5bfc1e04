//! REST API for builds.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use ci_core::JobStatus;
use serde::{Deserialize, Serialize};

use crate::config::CiConfig;
use crate::models::build::{Build, BuildStatus, NewBuild};
use crate::services::build_service::BuildStore;
use crate::services::github_service;

/// JSON row for build listings; the full report is served per build.
#[derive(Debug, Serialize)]
pub struct BuildJson {
    pub id: i64,
    pub repo: String,
    pub commit_sha: String,
    pub branch: String,
    pub pr_number: Option<u64>,
    pub author: Option<String>,
    pub message: Option<String>,
    pub status: BuildStatus,
    pub trigger_event: String,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub jobs: Vec<JobJson>,
}

#[derive(Debug, Serialize)]
pub struct JobJson {
    pub id: String,
    pub status: JobStatus,
}

impl From<Build> for BuildJson {
    fn from(build: Build) -> Self {
        let jobs = build
            .report
            .map(|report| {
                report
                    .jobs
                    .into_iter()
                    .map(|job| JobJson {
                        id: job.id,
                        status: job.status,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: build.id,
            repo: build.repo,
            commit_sha: build.commit_sha,
            branch: build.branch,
            pr_number: build.pr_number,
            author: build.author,
            message: build.message,
            status: build.status,
            trigger_event: build.trigger_event,
            duration_ms: build.duration_ms,
            created_at: build.created_at,
            jobs,
        }
    }
}

/// List builds, newest first.
pub async fn list_builds(store: &BuildStore, limit: usize) -> Vec<BuildJson> {
    store
        .list_builds(limit)
        .await
        .into_iter()
        .map(BuildJson::from)
        .collect()
}

// ── Trigger API ──

/// Request body for manually triggering a build.
#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub repo: String,
    pub branch: String,
    pub commit_sha: Option<String>,
}

/// Response for a triggered build.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub build_id: i64,
    pub status: BuildStatus,
}

/// Manually trigger a build of a branch.
///
/// Only GitHub `owner/name` repositories on the webhook allowlist can be
/// built, the same as for webhook deliveries.
pub async fn trigger_build(
    store: &BuildStore,
    config: &CiConfig,
    req: TriggerRequest,
) -> Result<TriggerResponse, StatusCode> {
    let repo = req.repo.trim();
    let branch = req.branch.trim();
    if repo.is_empty() || branch.is_empty() || branch.starts_with('-') {
        tracing::warn!("Trigger rejected: repo and branch are required");
        return Err(StatusCode::BAD_REQUEST);
    }
    if !github_service::is_repo_name(repo) {
        tracing::warn!(repo, "Trigger rejected: not an owner/name repository");
        return Err(StatusCode::BAD_REQUEST);
    }
    if !config.accepts_repo(repo) {
        tracing::warn!(repo, "Trigger rejected: repository not accepted");
        return Err(StatusCode::FORBIDDEN);
    }

    let commit_sha = req
        .commit_sha
        .map(|sha| sha.trim().to_string())
        .filter(|sha| !sha.is_empty())
        .unwrap_or_else(|| "HEAD".to_string());
    if commit_sha != "HEAD" && !commit_sha.chars().all(|c| c.is_ascii_hexdigit()) {
        tracing::warn!(sha = %commit_sha, "Trigger rejected: commit is not a sha");
        return Err(StatusCode::BAD_REQUEST);
    }
    let fingerprint = format!("{}-{}-manual", commit_sha, branch);

    let new_build = NewBuild {
        repo: repo.to_string(),
        commit_sha,
        branch: branch.to_string(),
        pr_number: None,
        author: Some("manual".to_string()),
        message: Some("Manual trigger via API".to_string()),
        fingerprint,
        trigger_event: "manual".to_string(),
    };

    let build = store.create_build(new_build).await;

    Ok(TriggerResponse {
        build_id: build.id,
        status: build.status,
    })
}
