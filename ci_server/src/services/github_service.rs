//! GitHub integration: webhook signatures, commit statuses and PR comments.

use ci_core::{JobStatus, RunReport};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// GitHub rejects longer status descriptions.
const MAX_DESCRIPTION_CHARS: usize = 140;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Whether `repo` is a GitHub `owner/name`, the only form builds clone.
pub fn is_repo_name(repo: &str) -> bool {
    let mut parts = repo.split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    [owner, name].iter().all(|part| {
        !part.is_empty()
            && !part.starts_with(['.', '-'])
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    })
}

/// Commit status context for a workflow job.
pub fn status_context(job_id: &str) -> String {
    format!("ci/{job_id}")
}

/// Commit status state for a finished job.
pub fn status_state(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Success => "success",
        JobStatus::Failure => "failure",
        JobStatus::Skipped => "error",
    }
}

/// Post a commit status to GitHub.
pub async fn post_status(
    token: &str,
    repo: &str,
    sha: &str,
    state: &str,
    description: &str,
    target_url: &str,
    context: &str,
) -> anyhow::Result<()> {
    if token.is_empty() {
        tracing::debug!("GitHub token not set, skipping status update");
        return Ok(());
    }

    let url = format!("https://api.github.com/repos/{repo}/statuses/{sha}");
    let description: String = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
    let body = serde_json::json!({
        "state": state,
        "description": description,
        "target_url": target_url,
        "context": context,
    });

    let client = reqwest::Client::new();
    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "tubereng-ci")
        .json(&body)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        tracing::warn!("GitHub status update failed: {} {}", status, text);
    }

    Ok(())
}

/// Post a comment on a PR.
pub async fn post_pr_comment(token: &str, repo: &str, pr_number: u64, body: &str) -> anyhow::Result<()> {
    if token.is_empty() {
        return Ok(());
    }

    let url = format!("https://api.github.com/repos/{repo}/issues/{pr_number}/comments");
    let payload = serde_json::json!({ "body": body });

    let client = reqwest::Client::new();
    client
        .post(&url)
        .header("Authorization", format!("Bearer {token}"))
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "tubereng-ci")
        .json(&payload)
        .send()
        .await?;

    Ok(())
}

/// Markdown summary of a run for a PR comment.
pub fn report_comment(report: &RunReport, build_url: &str) -> String {
    let verdict = if report.success() { "passed" } else { "failed" };
    let mut body = format!(
        "**{}** {verdict} in {:.1}s ([details]({build_url}))\n\n| Job | Status |\n|---|---|\n",
        report.workflow,
        report.duration.as_secs_f64()
    );
    for job in &report.jobs {
        body.push_str(&format!("| {} | {} |\n", job.name, job.status));
    }
    for job in &report.jobs {
        for err in &job.errors {
            body.push_str(&format!(
                "\n- `{}` / {} ({}): `{}`",
                job.id, err.step, err.category, err.title
            ));
        }
    }
    body
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::services::build_service::tests::report;

    pub(crate) fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_validate_signature() {
        let body = br#"{"zen":"Keep it logically awesome."}"#;
        let sig = sign("s3cret", body);

        assert!(validate_signature("s3cret", body, &sig));
        assert!(!validate_signature("other", body, &sig));
        assert!(!validate_signature("s3cret", b"tampered", &sig));
        assert!(!validate_signature("s3cret", body, "sha256=zz"));
        assert!(!validate_signature("s3cret", body, ""));
    }

    #[test]
    fn test_missing_secret_skips_validation() {
        assert!(validate_signature("", b"anything", ""));
    }

    #[test]
    fn test_is_repo_name() {
        assert!(is_repo_name("tubereng/tubereng"));
        assert!(is_repo_name("some-org/engine_2.rs"));
        assert!(!is_repo_name("/srv/git/engine"));
        assert!(!is_repo_name("file:///tmp/evil"));
        assert!(!is_repo_name("ext::sh -c touch% /tmp/pwned"));
        assert!(!is_repo_name("owner/../name"));
        assert!(!is_repo_name("owner/.hidden"));
        assert!(!is_repo_name("owner/"));
        assert!(!is_repo_name("-uupload-pack=touch/x"));
        assert!(!is_repo_name("-owner/name"));
        assert!(!is_repo_name("owner/name/extra"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_context("wasm"), "ci/wasm");
        assert_eq!(status_state(JobStatus::Success), "success");
        assert_eq!(status_state(JobStatus::Failure), "failure");
        assert_eq!(status_state(JobStatus::Skipped), "error");
    }

    #[test]
    fn test_report_comment() {
        let comment = report_comment(&report(JobStatus::Failure), "http://ci/builds/1");
        assert!(comment.starts_with("**CI** failed"));
        assert!(comment.contains("| Build & Test | failure |"));
        assert!(comment.contains("(http://ci/builds/1)"));
    }

    #[tokio::test]
    async fn test_post_without_token_is_noop() {
        post_status("", "o/r", "sha", "pending", "queued", "http://x", "ci/build")
            .await
            .unwrap();
        post_pr_comment("", "o/r", 1, "hi").await.unwrap();
    }
}
