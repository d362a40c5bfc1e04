//! Build executor: background task that polls for pending builds and runs them.
//!
//! Picks up pending builds, checks out the repo, runs its workflow through
//! the core runner and reports each job back to GitHub as a commit status.

use std::path::Path;
use std::sync::Arc;

use ci_core::{LocalExecutor, RunReport, Runner, Workflow};
use tokio::process::Command;

use crate::models::build::Build;
use crate::routes::CiRouterState;
use crate::services::github_service;

/// Run the executor loop forever. Spawned as a background tokio task.
pub async fn run_executor(state: CiRouterState) {
    tracing::info!(
        workspace = %state.config.workspace_dir.display(),
        max_concurrent = state.config.max_concurrent_builds,
        "Build executor started"
    );

    let mut interval = tokio::time::interval(state.config.poll_interval);
    loop {
        interval.tick().await;
        while let Some(build) = state
            .store
            .claim_next_pending(state.config.max_concurrent_builds)
            .await
        {
            tokio::spawn(execute_build(state.clone(), build));
        }
    }
}

/// Check out, run and report one claimed build, then drop its workspace.
pub async fn execute_build(state: CiRouterState, build: Build) {
    let workspace = state.config.workspace_dir.join(build.id.to_string());
    tracing::info!(
        build_id = build.id,
        repo = %build.repo,
        branch = %build.branch,
        "Executing build"
    );

    let outcome = match checkout(&build, &workspace).await {
        Ok(()) => run_build(&state, &build, &workspace).await,
        Err(e) => Err(e),
    };

    let (report, error) = match outcome {
        Ok(report) => (Some(report), None),
        Err(e) => {
            tracing::error!(build_id = build.id, "Build errored: {e:#}");
            (None, Some(format!("{e:#}")))
        }
    };

    let finished = state
        .store
        .finish_build(build.id, report, error)
        .await
        .unwrap_or(build);
    report_to_github(&state, &finished).await;

    if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
        tracing::debug!(build_id = finished.id, "Workspace cleanup skipped: {e}");
    }
}

/// Run the repository's workflow (or the configured one) in `work_dir`.
pub async fn run_build(state: &CiRouterState, build: &Build, work_dir: &Path) -> anyhow::Result<RunReport> {
    let workflow = match Workflow::load_from_repo(work_dir)? {
        Some(workflow) => {
            tracing::info!(build_id = build.id, "Using repository workflow");
            workflow
        }
        None => state.workflow.as_ref().clone(),
    };

    let runner = Runner::new(Arc::new(LocalExecutor::new(work_dir)));
    Ok(runner.run(&workflow).await?)
}

/// HTTPS clone URL for a GitHub `owner/name`. Anything else is refused,
/// so paths, `file://` and `ext::` transports never reach git.
fn clone_url(repo: &str) -> anyhow::Result<String> {
    if !github_service::is_repo_name(repo) {
        anyhow::bail!("Refusing to clone {repo:?}: not an owner/name repository");
    }
    Ok(format!("https://github.com/{repo}.git"))
}

/// Shallow clone of the build's branch (or PR head), pinned to its commit.
async fn checkout(build: &Build, workspace: &Path) -> anyhow::Result<()> {
    let url = clone_url(&build.repo)?;
    checkout_from(&url, build, workspace).await
}

async fn checkout_from(url: &str, build: &Build, workspace: &Path) -> anyhow::Result<()> {
    if let Some(parent) = workspace.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let _ = tokio::fs::remove_dir_all(workspace).await;

    let dest = workspace.to_string_lossy();

    match build.pr_number {
        Some(number) => {
            git(None, &["clone", "--depth", "1", "--", url, &dest]).await?;
            let pr_ref = format!("pull/{number}/head");
            git(Some(workspace), &["fetch", "--depth", "1", "origin", &pr_ref]).await?;
            git(Some(workspace), &["checkout", "--detach", "FETCH_HEAD"]).await?;
        }
        None => {
            git(None, &["clone", "--depth", "1", "--branch", &build.branch, "--", url, &dest]).await?;
        }
    }

    // Statuses are posted against this sha, so it is what must be built.
    // A newer push may have moved the branch past it.
    if build.commit_sha != "HEAD"
        && git(Some(workspace), &["checkout", "--detach", &build.commit_sha]).await.is_err()
    {
        tracing::info!(
            build_id = build.id,
            sha = %build.commit_sha,
            "Commit not in shallow clone, fetching it"
        );
        git(Some(workspace), &["fetch", "--depth", "1", "origin", &build.commit_sha])
            .await
            .map_err(|e| anyhow::anyhow!("Commit {} unavailable: {e}", build.commit_sha))?;
        git(Some(workspace), &["checkout", "--detach", "FETCH_HEAD"]).await?;
    }

    Ok(())
}

async fn git(dir: Option<&Path>, args: &[&str]) -> anyhow::Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| anyhow::anyhow!("git {}: {e}", args[0]))?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args[0],
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

pub(crate) fn build_url(dashboard_url: &str, build_id: i64) -> String {
    format!("{}/api/builds/{build_id}", dashboard_url.trim_end_matches('/'))
}

/// One commit status to post for a finished build.
#[derive(Debug, PartialEq)]
struct StatusUpdate {
    context: String,
    state: &'static str,
    description: String,
}

/// Final statuses for a build. Every configured job got a pending status
/// when the build was queued, so each one is resolved here.
fn status_updates<'a>(build: &Build, configured: impl IntoIterator<Item = &'a str>) -> Vec<StatusUpdate> {
    let Some(report) = &build.report else {
        let description = build.error.as_deref().unwrap_or("Build failed");
        return configured
            .into_iter()
            .map(|job_id| StatusUpdate {
                context: github_service::status_context(job_id),
                state: "error",
                description: description.to_string(),
            })
            .collect();
    };

    let mut updates: Vec<StatusUpdate> = report
        .jobs
        .iter()
        .map(|job| StatusUpdate {
            context: github_service::status_context(&job.id),
            state: github_service::status_state(job.status),
            description: job.description(),
        })
        .collect();
    for job_id in configured {
        if report.job(job_id).is_none() {
            updates.push(StatusUpdate {
                context: github_service::status_context(job_id),
                state: "error",
                description: "Not run: job is not in the repository workflow".to_string(),
            });
        }
    }
    updates
}

/// Post one commit status per job, plus a PR comment for pull requests.
async fn report_to_github(state: &CiRouterState, build: &Build) {
    let token = &state.config.github_token;
    if token.is_empty() {
        return;
    }
    let target_url = build_url(&state.config.dashboard_url, build.id);

    for update in status_updates(build, state.workflow.job_ids()) {
        if let Err(e) = github_service::post_status(
            token,
            &build.repo,
            &build.commit_sha,
            update.state,
            &update.description,
            &target_url,
            &update.context,
        )
        .await
        {
            tracing::warn!(build_id = build.id, context = %update.context, "Status update failed: {e}");
        }
    }

    if let (Some(number), Some(report)) = (build.pr_number, &build.report) {
        let body = github_service::report_comment(report, &target_url);
        if let Err(e) = github_service::post_pr_comment(token, &build.repo, number, &body).await {
            tracing::warn!(build_id = build.id, "PR comment failed: {e}");
        }
    }
}
