//! Dagger executor: every step runs in a fresh Rust container.
//!
//! Containers share nothing but the cargo cache volumes, so the job's
//! toolchain setup is replayed in front of each step. Dagger caches that
//! layer, making the replay free after the toolchain step itself.

use std::time::Instant;

use async_trait::async_trait;
use ci_core::executor::truncate_output;
use ci_core::{Action, Execution, Executor, StepRequest};
use dagger_sdk::{Directory, Query};

use crate::containers;

pub struct DaggerExecutor {
    client: Query,
    source: Directory,
    image: String,
}

impl DaggerExecutor {
    pub fn new(client: Query, source: Directory) -> Self {
        Self {
            client,
            source,
            image: containers::RUST_IMAGE.to_string(),
        }
    }
}

#[async_trait]
impl Executor for DaggerExecutor {
    fn name(&self) -> &'static str {
        "dagger"
    }

    async fn execute(&self, request: &StepRequest) -> Execution {
        let command = match &request.action {
            Action::Checkout | Action::Cache => return Execution::noop(),
            action => action.command().unwrap_or_default(),
        };

        let mut container = containers::rust_base(&self.client, &self.image, self.source.clone());
        for (key, value) in &request.env {
            container = container.with_env_variable(key, value);
        }

        if let (Action::Run { .. }, Some(toolchain)) = (&request.action, &request.toolchain) {
            container = container
                .with_exec(vec!["bash", "-c", toolchain.setup_command().as_str()])
                .with_env_variable("RUSTUP_TOOLCHAIN", toolchain.channel.as_str());
        }

        if let Some(sub) = &request.working_dir {
            container = container.with_workdir(format!("/app/{}", sub.trim_start_matches('/')));
        }

        let start = Instant::now();
        let exec = container.with_exec(vec!["bash", "-c", command.as_str()]);
        let run = exec.stdout();
        let result = tokio::time::timeout(request.timeout, run).await;
        let duration = start.elapsed();

        match result {
            Ok(Ok(stdout)) => Execution {
                exit_code: 0,
                stdout: truncate_output(stdout),
                stderr: String::new(),
                duration,
            },
            // Dagger reports the failing exec's exit code and stderr in the error.
            Ok(Err(e)) => Execution {
                exit_code: 1,
                stdout: String::new(),
                stderr: truncate_output(e.to_string()),
                duration,
            },
            Err(_) => Execution::failed(
                format!("Step timed out after {}s", request.timeout.as_secs()),
                duration,
            ),
        }
    }
}
