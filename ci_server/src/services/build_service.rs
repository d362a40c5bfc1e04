//! Build bookkeeping: creation, throttling, claiming and completion.
//!
//! Builds live in memory for the lifetime of the server.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ci_core::RunReport;
use tokio::sync::RwLock;

use crate::models::build::{Build, BuildStatus, NewBuild};

#[derive(Default)]
struct Inner {
    next_id: i64,
    builds: BTreeMap<i64, Build>,
}

#[derive(Default)]
pub struct BuildStore {
    inner: RwLock<Inner>,
}

impl BuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new pending build.
    pub async fn create_build(&self, new_build: NewBuild) -> Build {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let build = Build {
            id: inner.next_id,
            repo: new_build.repo,
            commit_sha: new_build.commit_sha,
            branch: new_build.branch,
            pr_number: new_build.pr_number,
            author: new_build.author,
            message: new_build.message,
            fingerprint: new_build.fingerprint,
            trigger_event: new_build.trigger_event,
            status: BuildStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error: None,
            report: None,
        };
        inner.builds.insert(build.id, build.clone());

        crate::metrics::build_status_changed(BuildStatus::Pending.as_str());
        tracing::info!(
            build_id = build.id,
            repo = %build.repo,
            branch = %build.branch,
            "Build created"
        );
        build
    }

    /// Check if a build with this fingerprint was created within the throttle window.
    pub async fn is_duplicate(&self, fingerprint: &str, throttle_secs: u64) -> bool {
        self.is_duplicate_at(fingerprint, throttle_secs, Utc::now()).await
    }

    async fn is_duplicate_at(&self, fingerprint: &str, throttle_secs: u64, now: DateTime<Utc>) -> bool {
        let cutoff = i64::try_from(throttle_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.inner
            .read()
            .await
            .builds
            .values()
            .any(|b| b.fingerprint == fingerprint && b.created_at > cutoff)
    }

    /// Move the oldest pending build to running, unless `max_running` builds already run.
    pub async fn claim_next_pending(&self, max_running: usize) -> Option<Build> {
        let mut inner = self.inner.write().await;
        let running = inner
            .builds
            .values()
            .filter(|b| b.status == BuildStatus::Running)
            .count();
        if running >= max_running {
            return None;
        }

        let build = inner
            .builds
            .values_mut()
            .find(|b| b.status == BuildStatus::Pending)?;
        build.status = BuildStatus::Running;
        build.started_at = Some(Utc::now());

        crate::metrics::build_status_changed(BuildStatus::Running.as_str());
        Some(build.clone())
    }

    /// Update build to terminal status with its report or error.
    pub async fn finish_build(
        &self,
        build_id: i64,
        report: Option<RunReport>,
        error: Option<String>,
    ) -> Option<Build> {
        let mut inner = self.inner.write().await;
        let build = inner.builds.get_mut(&build_id)?;

        let success = error.is_none() && report.as_ref().is_some_and(RunReport::success);
        let status = if success {
            BuildStatus::Success
        } else {
            BuildStatus::Failure
        };
        let now = Utc::now();
        let duration_ms = build
            .started_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64);

        build.status = status;
        build.finished_at = Some(now);
        build.duration_ms = duration_ms;
        build.report = report;
        build.error = error;

        crate::metrics::build_status_changed(status.as_str());
        if let Some(ms) = duration_ms {
            crate::metrics::build_duration(ms);
        }
        tracing::info!(
            build_id,
            status = status.as_str(),
            duration_ms,
            "Build finished"
        );
        Some(build.clone())
    }

    /// Get a build by ID.
    pub async fn get_build(&self, build_id: i64) -> Option<Build> {
        self.inner.read().await.builds.get(&build_id).cloned()
    }

    /// Get the latest build for a repository + branch.
    pub async fn get_latest(&self, repo: &str, branch: &str) -> Option<Build> {
        self.inner
            .read()
            .await
            .builds
            .values()
            .rev()
            .find(|b| b.repo == repo && b.branch == branch)
            .cloned()
    }

    /// Newest builds first.
    pub async fn list_builds(&self, limit: usize) -> Vec<Build> {
        self.inner
            .read()
            .await
            .builds
            .values()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Builds created at or after `since`, oldest first.
    pub async fn builds_since(&self, since: DateTime<Utc>) -> Vec<Build> {
        self.inner
            .read()
            .await
            .builds
            .values()
            .filter(|b| b.created_at >= since)
            .cloned()
            .collect()
    }
}
