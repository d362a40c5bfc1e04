//! Step executors: where commands actually run.
//!
//! The runner hands every step to an [`Executor`] as a [`StepRequest`].
//! Executors never fail: whatever goes wrong ends up as a non-zero
//! [`Execution::exit_code`] with the reason in `stderr`, so a broken step
//! fails its job the same way a failing command does.

mod local;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::workflow::{Action, Toolchain};

pub use local::LocalExecutor;

/// Per-field cap on captured output.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// One step, fully resolved for execution.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub job_id: String,
    pub step_name: String,
    pub action: Action,
    /// Toolchain installed by an earlier step of the same job, if any.
    pub toolchain: Option<Toolchain>,
    /// Workflow, job and step environment, merged in that order.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl Execution {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Failed execution that never produced process output.
    pub fn failed(reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: reason.into(),
            duration,
        }
    }

    pub fn noop() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Short name used in logs (`local`, `dagger`).
    fn name(&self) -> &'static str;

    async fn execute(&self, request: &StepRequest) -> Execution;
}

/// Keep the tail of oversized output.
pub fn truncate_output(text: String) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text;
    }
    let mut cut = text.len() - MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    format!("...truncated...\n{}", &text[cut..])
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_output_untouched() {
        assert_eq!(truncate_output("ok".to_string()), "ok");
    }

    #[test]
    fn test_truncate_keeps_tail() {
        let text = format!("{}END", "x".repeat(MAX_OUTPUT_BYTES));
        let out = truncate_output(text);
        assert!(out.starts_with("...truncated...\n"));
        assert!(out.ends_with("END"));
        assert_eq!(out.len(), "...truncated...\n".len() + MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(MAX_OUTPUT_BYTES);
        let out = truncate_output(text);
        assert!(out.ends_with('é'));
    }

    #[test]
    fn test_execution_success() {
        assert!(Execution::noop().success());
        assert!(!Execution::failed("boom", Duration::ZERO).success());
    }
}
