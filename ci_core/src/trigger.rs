//! Trigger matching: decides whether a repository event starts the workflow.

use serde::{Deserialize, Serialize};

use crate::workflow::{EventFilter, Triggers};

/// Pull request activities that run CI when the filter lists no `types`.
pub const DEFAULT_PR_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

/// A repository event, reduced to what trigger matching needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Push {
        /// Branch name, `None` for tag pushes.
        branch: Option<String>,
    },
    PullRequest {
        action: String,
        base_branch: String,
        head_branch: String,
        number: u64,
    },
}

impl Event {
    pub fn push(branch: &str) -> Self {
        Event::Push {
            branch: Some(branch.to_string()),
        }
    }

    /// Push event from a full git ref (`refs/heads/main`, `refs/tags/v1`).
    pub fn from_ref(git_ref: &str) -> Self {
        let branch = if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
            Some(branch.to_string())
        } else if git_ref.starts_with("refs/") {
            None
        } else {
            Some(git_ref.to_string())
        };
        Event::Push { branch }
    }

    pub fn pull_request(action: &str, base: &str, head: &str, number: u64) -> Self {
        Event::PullRequest {
            action: action.to_string(),
            base_branch: base.to_string(),
            head_branch: head.to_string(),
            number,
        }
    }

    /// Short event name as GitHub reports it.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Push { .. } => "push",
            Event::PullRequest { .. } => "pull_request",
        }
    }

    /// Branch whose code is built: pushed branch or the PR head.
    pub fn build_branch(&self) -> Option<&str> {
        match self {
            Event::Push { branch } => branch.as_deref(),
            Event::PullRequest { head_branch, .. } => Some(head_branch),
        }
    }
}

impl EventFilter {
    /// Branch filter: includes (empty = all) minus `branches-ignore`.
    pub fn matches_branch(&self, branch: &str) -> bool {
        let included =
            self.branches.is_empty() || self.branches.iter().any(|p| glob_match(p, branch));
        included && !self.branches_ignore.iter().any(|p| glob_match(p, branch))
    }

    fn matches_pr_action(&self, action: &str) -> bool {
        if self.types.is_empty() {
            DEFAULT_PR_ACTIONS.contains(&action)
        } else {
            self.types.iter().any(|t| t == action)
        }
    }
}

impl Triggers {
    pub fn matches(&self, event: &Event) -> bool {
        match event {
            Event::Push { branch } => match (&self.push, branch) {
                (Some(filter), Some(branch)) => filter.matches_branch(branch),
                _ => false,
            },
            Event::PullRequest {
                action,
                base_branch,
                ..
            } => match &self.pull_request {
                Some(filter) => filter.matches_pr_action(action) && filter.matches_branch(base_branch),
                None => false,
            },
        }
    }
}

/// Branch glob: `*` matches within one path segment, `**` across segments.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_at(&p, &t)
}

fn glob_at(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') if p.get(1) == Some(&'*') => {
            let rest = &p[2..];
            (0..=t.len()).any(|i| glob_at(rest, &t[i..]))
        }
        Some('*') => {
            let rest = &p[1..];
            for i in 0..=t.len() {
                if glob_at(rest, &t[i..]) {
                    return true;
                }
                if t.get(i) == Some(&'/') {
                    break;
                }
            }
            false
        }
        Some(c) => t.first() == Some(c) && glob_at(&p[1..], &t[1..]),
    }
}
