//! Local executor: runs steps as `bash -c` child processes in a workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::{truncate_output, Execution, Executor, StepRequest};
use crate::workflow::Action;

#[derive(Debug, Clone)]
pub struct LocalExecutor {
    workspace: PathBuf,
}

impl LocalExecutor {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(&self, request: &StepRequest) -> Execution {
        // The workspace already is the checkout, and cargo's own caches live
        // in ~/.cargo on this machine.
        let Some(command) = request.action.command() else {
            return Execution::noop();
        };

        let dir = match &request.working_dir {
            Some(sub) => self.workspace.join(sub),
            None => self.workspace.clone(),
        };

        let mut cmd = Command::new("bash");
        cmd.args(["-c", &command])
            .current_dir(&dir)
            .envs(&request.env)
            .env("CI", "true")
            .env("CI_JOB", &request.job_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout reaches everything the step started.
        #[cfg(unix)]
        cmd.process_group(0);

        if let (Action::Run { .. }, Some(toolchain)) = (&request.action, &request.toolchain) {
            cmd.env("RUSTUP_TOOLCHAIN", &toolchain.channel);
        }

        let start = Instant::now();
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    job = %request.job_id,
                    step = %request.step_name,
                    dir = %dir.display(),
                    "Failed to spawn step: {e}"
                );
                return Execution::failed(format!("Failed to execute command: {e}"), start.elapsed());
            }
        };
        let pid = child.id();
        let result = tokio::time::timeout(request.timeout, child.wait_with_output()).await;
        let duration = start.elapsed();

        match result {
            Ok(Ok(output)) => Execution {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_output(String::from_utf8_lossy(&output.stdout).into_owned()),
                stderr: truncate_output(String::from_utf8_lossy(&output.stderr).into_owned()),
                duration,
            },
            Ok(Err(e)) => Execution::failed(format!("Failed to execute command: {e}"), duration),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_group(pid);
                }
                Execution::failed(
                    format!("Step timed out after {}s", request.timeout.as_secs()),
                    duration,
                )
            }
        }
    }
}

/// SIGKILL the step's process group. Dropping the child only kills bash.
#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only signals that process group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        tracing::debug!(pgid, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::workflow::Toolchain;

    fn request(command: &str) -> StepRequest {
        StepRequest {
            job_id: "test".to_string(),
            step_name: "step".to_string(),
            action: Action::Run {
                command: command.to_string(),
            },
            toolchain: None,
            env: BTreeMap::new(),
            working_dir: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path());

        let out = exec.execute(&request("echo hello")).await;
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path());

        let out = exec.execute(&request("echo oops >&2; exit 3")).await;
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_runs_in_workspace_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/marker"), "x").unwrap();
        let exec = LocalExecutor::new(dir.path());

        let mut req = request("test -f marker");
        assert!(!exec.execute(&req).await.success());

        req.working_dir = Some("sub".to_string());
        assert!(exec.execute(&req).await.success());
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path());

        let mut req = request("echo \"$CI $CI_JOB $GREETING $RUSTUP_TOOLCHAIN\"");
        req.env.insert("GREETING".to_string(), "hi".to_string());
        req.toolchain = Some(Toolchain {
            channel: "nightly".to_string(),
            targets: Vec::new(),
            components: Vec::new(),
        });

        let out = exec.execute(&req).await;
        assert_eq!(out.stdout.trim(), "true test hi nightly");
    }

    #[tokio::test]
    async fn test_timeout_kills_step() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path());

        let mut req = request("sleep 5");
        req.timeout = Duration::from_millis(200);

        let out = exec.execute(&req).await;
        assert_eq!(out.exit_code, -1);
        assert!(out.stderr.contains("timed out"));
        assert!(out.duration < Duration::from_secs(5));
    }

    #[cfg(target_os = "linux")]
    fn running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // State follows the parenthesised command name; Z is a zombie.
            Ok(stat) => stat.rsplit_once(") ").is_some_and(|(_, rest)| !rest.starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_processes() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path());

        let mut req = request("sh -c 'echo $$ > sleeper.pid; exec sleep 30' & wait");
        req.timeout = Duration::from_millis(500);

        let out = exec.execute(&req).await;
        assert!(out.stderr.contains("timed out"));

        let pid = std::fs::read_to_string(dir.path().join("sleeper.pid")).unwrap();
        let pid = pid.trim().to_string();
        let mut alive = true;
        for _ in 0..40 {
            alive = running(&pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "sleep {pid} outlived the timed out step");
    }

    #[tokio::test]
    async fn test_missing_working_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path());

        let mut req = request("true");
        req.working_dir = Some("does-not-exist".to_string());

        let out = exec.execute(&req).await;
        assert_eq!(out.exit_code, -1);
        assert!(out.stderr.contains("Failed to execute command"));
    }

    #[tokio::test]
    async fn test_checkout_is_noop() {
        let exec = LocalExecutor::new("/nonexistent");
        let mut req = request("unused");
        req.action = Action::Checkout;

        let out = exec.execute(&req).await;
        assert!(out.success());
        assert!(out.stdout.is_empty());
    }
}
