//! KPI queries for the CI dashboard.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use ci_core::JobStatus;
use serde::Serialize;

use crate::models::build::{Build, BuildStatus};
use crate::services::build_service::BuildStore;

/// Build success rate over N days.
#[derive(Debug, Serialize, PartialEq)]
pub struct BuildSuccessRate {
    pub total: i64,
    pub success: i64,
    pub rate: f64,
}

/// Average build duration over N days.
#[derive(Debug, Serialize, PartialEq)]
pub struct AvgBuildDuration {
    pub avg_ms: Option<f64>,
    pub count: i64,
}

/// Build count grouped by status.
#[derive(Debug, Serialize, PartialEq)]
pub struct BuildsByStatus {
    pub status: String,
    pub count: i64,
}

/// Failure count per workflow job, most failing first.
#[derive(Debug, Serialize, PartialEq)]
pub struct JobFailures {
    pub job: String,
    pub failures: i64,
}

/// Start of a `days` long window ending at `now`. Negative windows are
/// empty; windows past the earliest representable time cover everything.
fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    Duration::try_days(days.max(0))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn recent(store: &BuildStore, days: i64) -> Vec<Build> {
    store.builds_since(window_start(Utc::now(), days)).await
}

pub async fn query_success_rate(store: &BuildStore, days: i64) -> BuildSuccessRate {
    success_rate(&recent(store, days).await)
}

pub async fn query_avg_duration(store: &BuildStore, days: i64) -> AvgBuildDuration {
    avg_duration(&recent(store, days).await)
}

pub async fn query_builds_by_status(store: &BuildStore, days: i64) -> Vec<BuildsByStatus> {
    builds_by_status(&recent(store, days).await)
}

pub async fn query_job_failures(store: &BuildStore, days: i64) -> Vec<JobFailures> {
    job_failures(&recent(store, days).await)
}

fn success_rate(builds: &[Build]) -> BuildSuccessRate {
    let finished = builds.iter().filter(|b| b.status.is_terminal());
    let (total, success) = finished.fold((0, 0), |(total, success), b| {
        (total + 1, success + i64::from(b.status == BuildStatus::Success))
    });
    let rate = if total == 0 {
        0.0
    } else {
        success as f64 / total as f64
    };
    BuildSuccessRate { total, success, rate }
}

fn avg_duration(builds: &[Build]) -> AvgBuildDuration {
    let durations: Vec<u64> = builds.iter().filter_map(|b| b.duration_ms).collect();
    let count = durations.len() as i64;
    let avg_ms = (count > 0).then(|| durations.iter().sum::<u64>() as f64 / count as f64);
    AvgBuildDuration { avg_ms, count }
}

fn builds_by_status(builds: &[Build]) -> Vec<BuildsByStatus> {
    let mut counts: BTreeMap<&'static str, i64> = BTreeMap::new();
    for build in builds {
        *counts.entry(build.status.as_str()).or_default() += 1;
    }
    let mut rows: Vec<BuildsByStatus> = counts
        .into_iter()
        .map(|(status, count)| BuildsByStatus {
            status: status.to_string(),
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

fn job_failures(builds: &[Build]) -> Vec<JobFailures> {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for report in builds.iter().filter_map(|b| b.report.as_ref()) {
        for job in report.jobs.iter().filter(|j| j.status == JobStatus::Failure) {
            *counts.entry(job.id.as_str()).or_default() += 1;
        }
    }
    let mut rows: Vec<JobFailures> = counts
        .into_iter()
        .map(|(job, failures)| JobFailures {
            job: job.to_string(),
            failures,
        })
        .collect();
    rows.sort_by(|a, b| b.failures.cmp(&a.failures));
    rows
}
