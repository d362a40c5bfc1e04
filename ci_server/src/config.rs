//! CI server configuration: loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// GitHub personal access token for API calls.
    pub github_token: String,
    /// Throttle window in seconds between duplicate builds.
    pub throttle_window_secs: u64,
    /// Maximum number of concurrent builds.
    pub max_concurrent_builds: usize,
    /// Where builds are checked out.
    pub workspace_dir: PathBuf,
    /// Repositories (`owner/name`) accepted from webhooks. Empty accepts all.
    pub repos: Vec<String>,
    /// Base URL linked from GitHub commit statuses.
    pub dashboard_url: String,
    /// How often the executor looks for pending builds.
    pub poll_interval: Duration,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            github_webhook_secret: String::new(),
            github_token: String::new(),
            throttle_window_secs: 60,
            max_concurrent_builds: 1,
            workspace_dir: std::env::temp_dir().join("tubereng-ci"),
            repos: Vec::new(),
            dashboard_url: "http://localhost:9090".to_string(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl CiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let github_webhook_secret = std::env::var("CI_WEBHOOK_SECRET").unwrap_or_default();
        let github_token = std::env::var("CI_GITHUB_TOKEN").unwrap_or_default();
        let throttle_window_secs = std::env::var("CI_THROTTLE_WINDOW")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.throttle_window_secs);
        let max_concurrent_builds = std::env::var("CI_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_concurrent_builds);
        let workspace_dir = std::env::var("CI_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        let repos = std::env::var("CI_REPOS")
            .map(|s| parse_repos(&s))
            .unwrap_or_default();
        let dashboard_url = std::env::var("CI_DASHBOARD_URL").unwrap_or(defaults.dashboard_url);
        let poll_interval = std::env::var("CI_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        if github_webhook_secret.is_empty() {
            tracing::warn!("CI_WEBHOOK_SECRET not set -- webhook signature validation disabled");
        }
        if github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }

        Self {
            github_webhook_secret,
            github_token,
            throttle_window_secs,
            max_concurrent_builds,
            workspace_dir,
            repos,
            dashboard_url,
            poll_interval,
        }
    }

    /// Whether webhooks for this repository are accepted.
    pub fn accepts_repo(&self, repo: &str) -> bool {
        self.repos.is_empty() || self.repos.iter().any(|r| r.eq_ignore_ascii_case(repo))
    }
}

fn parse_repos(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repos() {
        assert_eq!(
            parse_repos(" tubereng/tubereng, ,other/repo "),
            vec!["tubereng/tubereng", "other/repo"]
        );
        assert!(parse_repos("").is_empty());
    }

    #[test]
    fn test_accepts_repo() {
        let mut config = CiConfig::default();
        assert!(config.accepts_repo("anyone/anything"));

        config.repos = vec!["Tubereng/Tubereng".to_string()];
        assert!(config.accepts_repo("tubereng/tubereng"));
        assert!(!config.accepts_repo("other/repo"));
    }
}
