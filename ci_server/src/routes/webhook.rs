//! GitHub webhook handler: receives push/PR events, creates builds.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use ci_core::Event;
use serde_json::Value;

use crate::models::build::NewBuild;
use crate::routes::CiRouterState;
use crate::services::executor::build_url;
use crate::services::github_service;

/// All-zero sha GitHub sends for a deleted branch.
const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// Handle an incoming GitHub webhook payload.
pub async fn handle_webhook(
    state: &CiRouterState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    // Validate signature
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !github_service::validate_signature(&state.config.github_webhook_secret, &body, signature) {
        tracing::warn!("Webhook signature validation failed");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // Parse event type
    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let payload: Value = serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?;

    let delivery = match event_type {
        "push" => parse_push(&payload),
        "pull_request" => parse_pull_request(&payload),
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            return Ok(StatusCode::OK);
        }
        _ => {
            tracing::debug!("Ignoring webhook event: {}", event_type);
            return Ok(StatusCode::OK);
        }
    };

    match delivery {
        Some(delivery) => enqueue(state, delivery).await,
        None => Ok(StatusCode::OK),
    }
}

/// A push or pull request reduced to what a build needs.
#[derive(Debug, PartialEq)]
struct Delivery {
    event: Event,
    repo: String,
    commit_sha: String,
    author: Option<String>,
    message: Option<String>,
}

impl Delivery {
    fn fingerprint(&self) -> String {
        let branch = self.event.build_branch().unwrap_or_default();
        match &self.event {
            Event::Push { .. } => format!("{}-{}-push", self.commit_sha, branch),
            Event::PullRequest { number, .. } => format!("{}-{}-pr{}", self.commit_sha, branch, number),
        }
    }

    fn pr_number(&self) -> Option<u64> {
        match self.event {
            Event::PullRequest { number, .. } => Some(number),
            Event::Push { .. } => None,
        }
    }
}

fn str_field(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_push(payload: &Value) -> Option<Delivery> {
    let repo = str_field(&payload["repository"]["full_name"])?;
    let commit_sha = str_field(&payload["after"])?;
    if commit_sha == NULL_SHA || payload["deleted"].as_bool() == Some(true) {
        return None;
    }

    let event = Event::from_ref(payload["ref"].as_str()?);
    event.build_branch()?;

    Some(Delivery {
        event,
        repo,
        commit_sha,
        author: str_field(&payload["pusher"]["name"]),
        message: str_field(&payload["head_commit"]["message"]),
    })
}

fn parse_pull_request(payload: &Value) -> Option<Delivery> {
    let pr = &payload["pull_request"];
    let action = payload["action"].as_str()?;
    let number = payload["number"].as_u64().or_else(|| pr["number"].as_u64())?;

    Some(Delivery {
        event: Event::pull_request(
            action,
            &str_field(&pr["base"]["ref"])?,
            &str_field(&pr["head"]["ref"])?,
            number,
        ),
        repo: str_field(&payload["repository"]["full_name"])?,
        commit_sha: str_field(&pr["head"]["sha"])?,
        author: str_field(&pr["user"]["login"]),
        message: str_field(&pr["title"]),
    })
}

async fn enqueue(state: &CiRouterState, delivery: Delivery) -> Result<StatusCode, StatusCode> {
    if !github_service::is_repo_name(&delivery.repo) || !state.config.accepts_repo(&delivery.repo) {
        tracing::debug!("Repository not accepted: {}", delivery.repo);
        return Ok(StatusCode::OK);
    }

    if !state.workflow.should_run(&delivery.event) {
        tracing::debug!(
            repo = %delivery.repo,
            event = delivery.event.name(),
            "Event does not trigger the workflow"
        );
        return Ok(StatusCode::OK);
    }

    // Compute fingerprint for dedup
    let fingerprint = delivery.fingerprint();
    if state
        .store
        .is_duplicate(&fingerprint, state.config.throttle_window_secs)
        .await
    {
        tracing::info!("Duplicate build throttled: {}", fingerprint);
        return Ok(StatusCode::OK);
    }

    let new_build = NewBuild {
        branch: delivery.event.build_branch().unwrap_or_default().to_string(),
        pr_number: delivery.pr_number(),
        trigger_event: delivery.event.name().to_string(),
        repo: delivery.repo,
        commit_sha: delivery.commit_sha,
        author: delivery.author,
        message: delivery.message,
        fingerprint,
    };
    let build = state.store.create_build(new_build).await;

    tracing::info!(
        build_id = build.id,
        branch = %build.branch,
        event = %build.trigger_event,
        "Build created from webhook"
    );

    // Post pending status to GitHub
    let target_url = build_url(&state.config.dashboard_url, build.id);
    for job_id in state.workflow.job_ids() {
        if let Err(e) = github_service::post_status(
            &state.config.github_token,
            &build.repo,
            &build.commit_sha,
            "pending",
            "Build queued",
            &target_url,
            &github_service::status_context(job_id),
        )
        .await
        {
            tracing::warn!(build_id = build.id, "Pending status failed: {e}");
        }
    }

    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn push_payload(git_ref: &str, after: &str) -> Value {
        json!({
            "ref": git_ref,
            "after": after,
            "repository": { "full_name": "tubereng/tubereng" },
            "pusher": { "name": "dev" },
            "head_commit": { "message": "Fix sprite batching" },
        })
    }

    fn pr_payload(action: &str, base: &str) -> Value {
        json!({
            "action": action,
            "number": 42,
            "repository": { "full_name": "tubereng/tubereng" },
            "pull_request": {
                "title": "Add audio mixer",
                "base": { "ref": base },
                "head": { "ref": "feature/audio", "sha": "f00dcafe" },
                "user": { "login": "contributor" },
            },
        })
    }

    #[test]
    fn test_parse_push() {
        let delivery = parse_push(&push_payload("refs/heads/main", "abc1234")).unwrap();
        assert_eq!(delivery.event, Event::push("main"));
        assert_eq!(delivery.repo, "tubereng/tubereng");
        assert_eq!(delivery.author.as_deref(), Some("dev"));
        assert_eq!(delivery.message.as_deref(), Some("Fix sprite batching"));
        assert_eq!(delivery.fingerprint(), "abc1234-main-push");
        assert_eq!(delivery.pr_number(), None);
    }

    #[test]
    fn test_parse_push_ignores_tags_and_deletions() {
        assert!(parse_push(&push_payload("refs/tags/v1.0.0", "abc1234")).is_none());
        assert!(parse_push(&push_payload("refs/heads/main", NULL_SHA)).is_none());
        assert!(parse_push(&push_payload("refs/heads/main", "")).is_none());
        assert!(parse_push(&json!({})).is_none());
    }

    #[test]
    fn test_parse_pull_request() {
        let delivery = parse_pull_request(&pr_payload("synchronize", "main")).unwrap();
        assert_eq!(
            delivery.event,
            Event::pull_request("synchronize", "main", "feature/audio", 42)
        );
        assert_eq!(delivery.commit_sha, "f00dcafe");
        assert_eq!(delivery.author.as_deref(), Some("contributor"));
        assert_eq!(delivery.fingerprint(), "f00dcafe-feature/audio-pr42");
        assert_eq!(delivery.pr_number(), Some(42));
    }
}
