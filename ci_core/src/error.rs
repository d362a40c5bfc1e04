//! Workflow loading, validation and run errors.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to read workflow {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("workflow {} is too large: {size} bytes (max {max})", path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("invalid workflow YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("workflow defines no jobs")]
    NoJobs,

    #[error("invalid job id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidJobId(String),

    #[error("job '{0}' has no steps")]
    NoSteps(String),

    #[error("job '{job}' step {index}: {reason}")]
    InvalidStep {
        job: String,
        index: usize,
        reason: String,
    },

    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("job '{job}' needs unknown job '{missing}'")]
    MissingDependency { job: String, missing: String },

    #[error("job '{0}' needs itself")]
    SelfDependency(String),

    #[error("circular job dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("unknown job '{0}'")]
    UnknownJob(String),
}
