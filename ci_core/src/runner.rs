//! Workflow runner: executes jobs and collects a [`RunReport`].
//!
//! Jobs run layer by layer (see [`crate::plan`]); jobs inside a layer run
//! concurrently on the tokio runtime, bounded by `max_parallel`. Steps inside
//! a job run in order. The first failing step (unless `continue-on-error`)
//! fails the job and every later step is reported as skipped. A job whose
//! `needs` did not all succeed is skipped without running.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Result, WorkflowError};
use crate::executor::{duration_ms, Execution, Executor, StepRequest};
use crate::fingerprint::{self, ErrorSummary};
use crate::plan;
use crate::workflow::{Action, Job, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl StepReport {
    fn skipped(name: String, reason: &str) -> Self {
        Self {
            name,
            status: StepStatus::Skipped,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.to_string(),
            duration: Duration::ZERO,
        }
    }

    fn from_execution(name: String, status: StepStatus, exec: Execution) -> Self {
        Self {
            name,
            status,
            exit_code: Some(exec.exit_code),
            stdout: exec.stdout,
            stderr: exec.stderr,
            duration: exec.duration,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub steps: Vec<StepReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorSummary>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl JobReport {
    fn skipped(id: &str, job: &Job, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            name: job.display_name(id).to_string(),
            status: JobStatus::Skipped,
            steps: job
                .steps
                .iter()
                .map(|s| StepReport::skipped(s.display_name(), reason))
                .collect(),
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn aborted(id: &str, job: &Job, reason: &str) -> Self {
        let mut report = Self::skipped(id, job, reason);
        report.status = JobStatus::Failure;
        report.errors.push(fingerprint::summarize("job", reason));
        crate::metrics::job_finished(id, JobStatus::Failure.as_str(), 0);
        report
    }

    /// One-line description suitable for a commit status.
    pub fn description(&self) -> String {
        match (self.status, self.errors.first()) {
            (JobStatus::Failure, Some(err)) => format!("{} failed: {}", err.step, err.title),
            (status, _) => format!("{} {}", self.name, status),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub workflow: String,
    pub jobs: Vec<JobReport>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunReport {
    /// A run passes when every job it ran passed.
    pub fn success(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Success)
    }

    pub fn job(&self, id: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.workflow)?;
        for job in &self.jobs {
            writeln!(
                f,
                "[{}] {}: {} ({:.1}s)",
                job.id,
                job.name,
                job.status,
                job.duration.as_secs_f64()
            )?;
            for err in &job.errors {
                writeln!(f, "    {} [{}] {}", err.step, err.category, err.title)?;
            }
        }
        let verdict = if self.success() { "passed" } else { "failed" };
        write!(
            f,
            "=== {} {verdict} in {:.1}s ===",
            self.workflow,
            self.duration.as_secs_f64()
        )
    }
}

pub struct Runner {
    executor: Arc<dyn Executor>,
    max_parallel: Option<usize>,
    jobs: Option<Vec<String>>,
}

impl Runner {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            max_parallel: None,
            jobs: None,
        }
    }

    /// Limit how many jobs run at once. Zero is treated as one.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel.max(1));
        self
    }

    /// Run only these jobs. Their `needs` outside the selection are ignored.
    pub fn with_jobs<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.jobs = Some(jobs.into_iter().map(Into::into).collect());
        self
    }

    pub async fn run(&self, workflow: &Workflow) -> Result<RunReport> {
        if let Some(selected) = &self.jobs {
            if let Some(unknown) = selected.iter().find(|id| workflow.job(id).is_none()) {
                return Err(WorkflowError::UnknownJob(unknown.clone()));
            }
        }
        let selected = |id: &str| {
            self.jobs
                .as_ref()
                .map_or(true, |jobs| jobs.iter().any(|j| j == id))
        };

        let layers = plan::plan(workflow)?;
        let permits = self
            .max_parallel
            .unwrap_or_else(|| workflow.jobs.len().max(1));
        let semaphore = Arc::new(Semaphore::new(permits));

        tracing::info!(
            workflow = %workflow.name,
            executor = self.executor.name(),
            max_parallel = permits,
            "Workflow started"
        );

        let start = Instant::now();
        let mut results: HashMap<String, JobReport> = HashMap::new();

        let mut launched = Vec::new();
        for layer in layers {
            let mut set = JoinSet::new();

            for id in layer.into_iter().filter(|id| selected(id.as_str())) {
                let Some(job) = workflow.job(&id) else {
                    continue;
                };

                let blocked = job
                    .needs
                    .iter()
                    .filter_map(|dep| results.get(dep))
                    .find(|dep| dep.status != JobStatus::Success);
                if let Some(dep) = blocked {
                    tracing::info!(job = %id, needs = %dep.id, "Job skipped (dependency did not succeed)");
                    let reason = format!("Skipped (needed job '{}' {})", dep.id, dep.status);
                    results.insert(id.clone(), JobReport::skipped(&id, job, &reason));
                    continue;
                }

                let executor = self.executor.clone();
                let semaphore = semaphore.clone();
                let env = workflow.env.clone();
                launched.push(id.clone());
                let job = job.clone();
                set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_job(executor.as_ref(), &env, &id, &job).await
                });
            }

            let mut panic = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(report) => {
                        results.insert(report.id.clone(), report);
                    }
                    Err(e) => {
                        tracing::error!("Job task failed: {e}");
                        panic = Some(e.to_string());
                    }
                }
            }

            // A job whose task died still fails the run.
            for id in launched.drain(..) {
                if results.contains_key(&id) {
                    continue;
                }
                let Some(job) = workflow.job(&id) else {
                    continue;
                };
                let reason = format!(
                    "Job task failed: {}",
                    panic.as_deref().unwrap_or("task ended without a report")
                );
                results.insert(id.clone(), JobReport::aborted(&id, job, &reason));
            }
        }

        let jobs: Vec<JobReport> = workflow
            .job_ids()
            .filter_map(|id| results.remove(id))
            .collect();

        let report = RunReport {
            workflow: workflow.name.clone(),
            jobs,
            duration: start.elapsed(),
        };

        tracing::info!(
            workflow = %report.workflow,
            success = report.success(),
            duration_ms = report.duration.as_millis() as u64,
            "Workflow finished"
        );

        Ok(report)
    }
}

async fn run_job(
    executor: &dyn Executor,
    workflow_env: &BTreeMap<String, String>,
    id: &str,
    job: &Job,
) -> JobReport {
    let name = job.display_name(id).to_string();
    tracing::info!(job = %id, name = %name, steps = job.steps.len(), "Job started");

    let start = Instant::now();
    // Out-of-range timeouts mean no deadline.
    let deadline = start.checked_add(Duration::from_secs(job.timeout_minutes.saturating_mul(60)));
    let mut toolchain = None;
    let mut failed = false;
    let mut steps = Vec::with_capacity(job.steps.len());
    let mut errors = Vec::new();

    for step in &job.steps {
        let step_name = step.display_name();

        if failed {
            steps.push(StepReport::skipped(step_name, "Skipped (previous step failed)"));
            continue;
        }

        let action = match step.action() {
            Ok(action) => action,
            Err(e) => {
                let exec = Execution::failed(e.to_string(), Duration::ZERO);
                errors.push(fingerprint::summarize(&step_name, &exec.stderr));
                steps.push(StepReport::from_execution(step_name, StepStatus::Failure, exec));
                failed = true;
                continue;
            }
        };

        let remaining = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
        if remaining.is_zero() {
            let exec = Execution::failed(
                format!("Job timed out after {} minutes", job.timeout_minutes),
                Duration::ZERO,
            );
            errors.push(fingerprint::summarize(&step_name, &exec.stderr));
            steps.push(StepReport::from_execution(step_name, StepStatus::Failure, exec));
            failed = true;
            continue;
        }

        let mut env = workflow_env.clone();
        env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let request = StepRequest {
            job_id: id.to_string(),
            step_name: step_name.clone(),
            action: action.clone(),
            toolchain: toolchain.clone(),
            env,
            working_dir: step.working_directory.clone(),
            timeout: remaining,
        };

        tracing::debug!(job = %id, step = %step_name, "Running step");
        let exec = executor.execute(&request).await;
        crate::metrics::step_duration(&step_name, exec.duration.as_millis() as u64);

        if exec.success() {
            if let Action::Toolchain(tc) = action {
                toolchain = Some(tc);
            }
            steps.push(StepReport::from_execution(step_name, StepStatus::Success, exec));
            continue;
        }

        if step.continue_on_error {
            tracing::warn!(
                job = %id,
                step = %step_name,
                exit_code = exec.exit_code,
                "Step failed (continue-on-error)"
            );
        } else {
            tracing::warn!(
                job = %id,
                step = %step_name,
                exit_code = exec.exit_code,
                "Step failed"
            );
            let text = if exec.stderr.trim().is_empty() {
                &exec.stdout
            } else {
                &exec.stderr
            };
            errors.push(fingerprint::summarize(&step_name, text));
            failed = true;
        }
        steps.push(StepReport::from_execution(step_name, StepStatus::Failure, exec));
    }

    let status = if failed {
        JobStatus::Failure
    } else {
        JobStatus::Success
    };
    let duration = start.elapsed();
    crate::metrics::job_finished(id, status.as_str(), duration.as_millis() as u64);
    tracing::info!(
        job = %id,
        status = status.as_str(),
        duration_ms = duration.as_millis() as u64,
        "Job finished"
    );

    JobReport {
        id: id.to_string(),
        name,
        status,
        steps,
        errors,
        duration,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::executor::LocalExecutor;
    use crate::workflow::default_workflow;

    fn local() -> (tempfile::TempDir, Arc<dyn Executor>) {
        let dir = tempfile::tempdir().unwrap();
        let exec: Arc<dyn Executor> = Arc::new(LocalExecutor::new(dir.path()));
        (dir, exec)
    }

    /// Records every command and fails the ones containing "fail".
    #[derive(Default)]
    struct Recording {
        commands: Mutex<Vec<(String, String)>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Executor for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn execute(&self, request: &StepRequest) -> Execution {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let command = request.action.command().unwrap_or_default();
            self.commands
                .lock()
                .unwrap()
                .push((request.job_id.clone(), command.clone()));
            Execution {
                exit_code: if command.contains("fail") { 1 } else { 0 },
                stderr: if command.contains("fail") {
                    "error: it failed".to_string()
                } else {
                    String::new()
                },
                ..Execution::default()
            }
        }
    }

    #[tokio::test]
    async fn test_successful_workflow() {
        let (_dir, exec) = local();
        let wf = Workflow::from_yaml(
            r#"
name: Demo
on: push
env: { GREETING: hello }
jobs:
  one:
    steps:
      - uses: actions/checkout@v4
      - run: echo "$GREETING one"
  two:
    name: Second
    steps:
      - run: echo two
"#,
        )
        .unwrap();

        let report = Runner::new(exec).run(&wf).await.unwrap();
        assert!(report.success());
        assert_eq!(report.jobs.len(), 2);

        let one = report.job("one").unwrap();
        assert_eq!(one.status, JobStatus::Success);
        assert_eq!(one.steps[1].stdout.trim(), "hello one");
        assert_eq!(report.job("two").unwrap().name, "Second");
    }

    #[tokio::test]
    async fn test_failing_step_skips_rest_of_job() {
        let (_dir, exec) = local();
        let wf = Workflow::from_yaml(
            r#"
on: push
jobs:
  build:
    steps:
      - name: Compile
        run: 'echo "error[E0308]: mismatched types" >&2; exit 101'
      - name: Test
        run: echo never
  fmt:
    steps:
      - run: "true"
"#,
        )
        .unwrap();

        let report = Runner::new(exec).run(&wf).await.unwrap();
        assert!(!report.success());

        let build = report.job("build").unwrap();
        assert_eq!(build.status, JobStatus::Failure);
        assert_eq!(build.steps[0].status, StepStatus::Failure);
        assert_eq!(build.steps[0].exit_code, Some(101));
        assert_eq!(build.steps[1].status, StepStatus::Skipped);
        assert_eq!(build.steps[1].exit_code, None);
        assert_eq!(build.errors.len(), 1);
        assert_eq!(build.errors[0].category, "compile");
        assert_eq!(build.description(), "Compile failed: error[E0308]: mismatched types");

        // independent job is unaffected
        assert_eq!(report.job("fmt").unwrap().status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_continue_on_error() {
        let (_dir, exec) = local();
        let wf = Workflow::from_yaml(
            r#"
on: push
jobs:
  a:
    steps:
      - run: exit 1
        continue-on-error: true
      - run: echo after
"#,
        )
        .unwrap();

        let report = Runner::new(exec).run(&wf).await.unwrap();
        let a = report.job("a").unwrap();
        assert_eq!(a.status, JobStatus::Success);
        assert_eq!(a.steps[0].status, StepStatus::Failure);
        assert_eq!(a.steps[1].status, StepStatus::Success);
        assert!(a.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failed_need_skips_dependent() {
        let exec = Arc::new(Recording::default());
        let wf = Workflow::from_yaml(
            r#"
on: push
jobs:
  build: { steps: [ { run: "build fail" } ] }
  deploy: { needs: build, steps: [ { run: deploy } ] }
  lint: { steps: [ { run: lint } ] }
"#,
        )
        .unwrap();

        let report = Runner::new(exec.clone()).run(&wf).await.unwrap();
        assert_eq!(report.job("build").unwrap().status, JobStatus::Failure);
        assert_eq!(report.job("lint").unwrap().status, JobStatus::Success);

        let deploy = report.job("deploy").unwrap();
        assert_eq!(deploy.status, JobStatus::Skipped);
        assert!(deploy.steps[0].stderr.contains("'build'"));

        let commands = exec.commands.lock().unwrap();
        assert!(!commands.iter().any(|(job, _)| job == "deploy"));
    }

    #[tokio::test]
    async fn test_report_keeps_declaration_order() {
        let exec = Arc::new(Recording::default());
        let wf = Workflow::from_yaml(
            r#"
on: push
jobs:
  z: { needs: a, steps: [ { run: z } ] }
  a: { steps: [ { run: a } ] }
  m: { steps: [ { run: m } ] }
"#,
        )
        .unwrap();

        let report = Runner::new(exec).run(&wf).await.unwrap();
        let ids: Vec<_> = report.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_jobs_run_concurrently_up_to_limit() {
        let exec = Arc::new(Recording::default());
        let report = Runner::new(exec.clone()).run(&default_workflow()).await.unwrap();
        assert!(report.success());
        assert!(exec.peak.load(Ordering::SeqCst) > 1);

        let serial = Arc::new(Recording::default());
        Runner::new(serial.clone())
            .with_max_parallel(1)
            .run(&default_workflow())
            .await
            .unwrap();
        assert_eq!(serial.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_filter() {
        let exec = Arc::new(Recording::default());
        let report = Runner::new(exec.clone())
            .with_jobs(["wasm"])
            .run(&default_workflow())
            .await
            .unwrap();

        assert_eq!(report.jobs.len(), 1);
        let commands = exec.commands.lock().unwrap();
        assert!(commands.iter().all(|(job, _)| job == "wasm"));
        assert!(commands.iter().any(|(_, cmd)| cmd.contains("--target wasm32-unknown-unknown")));
    }

    #[tokio::test]
    async fn test_unknown_job_in_filter() {
        let exec = Arc::new(Recording::default());
        let err = Runner::new(exec)
            .with_jobs(["nope"])
            .run(&default_workflow())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownJob(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_toolchain_passed_to_later_steps() {
        #[derive(Default)]
        struct Capture(Mutex<Vec<Option<String>>>);

        #[async_trait]
        impl Executor for Capture {
            fn name(&self) -> &'static str {
                "capture"
            }
            async fn execute(&self, request: &StepRequest) -> Execution {
                self.0
                    .lock()
                    .unwrap()
                    .push(request.toolchain.as_ref().map(|t| t.channel.clone()));
                Execution::noop()
            }
        }

        let exec = Arc::new(Capture::default());
        Runner::new(exec.clone())
            .with_jobs(["fmt"])
            .run(&default_workflow())
            .await
            .unwrap();

        let seen = exec.0.lock().unwrap();
        // checkout, toolchain, fmt
        assert_eq!(*seen, vec![None, None, Some("stable".to_string())]);
    }

    #[tokio::test]
    async fn test_report_display_and_json() {
        let exec = Arc::new(Recording::default());
        let report = Runner::new(exec).run(&default_workflow()).await.unwrap();

        let text = report.to_string();
        assert!(text.contains("[wasm] WASM Check: success"));
        assert!(text.ends_with(&format!("=== CI passed in {:.1}s ===", report.duration.as_secs_f64())));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["jobs"][0]["status"], "success");
        assert_eq!(json["jobs"][0]["id"], "build");
    }

    /// Panics on any command containing "boom".
    struct Panicking;

    #[async_trait]
    impl Executor for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn execute(&self, request: &StepRequest) -> Execution {
            let command = request.action.command().unwrap_or_default();
            if command.contains("boom") {
                panic!("executor blew up");
            }
            Execution::default()
        }
    }

    #[tokio::test]
    async fn test_panicking_job_fails_the_run() {
        let wf = Workflow::from_yaml(
            r#"
on: push
jobs:
  ok:
    steps:
      - run: echo fine
  crash:
    steps:
      - run: echo boom
  after:
    needs: crash
    steps:
      - run: echo later
"#,
        )
        .unwrap();

        let report = Runner::new(Arc::new(Panicking)).run(&wf).await.unwrap();
        assert!(!report.success());
        assert_eq!(report.jobs.len(), 3);

        let crash = report.job("crash").unwrap();
        assert_eq!(crash.status, JobStatus::Failure);
        assert!(crash.errors[0].title.starts_with("Job task failed"));
        assert_eq!(report.job("ok").unwrap().status, JobStatus::Success);
        assert_eq!(report.job("after").unwrap().status, JobStatus::Skipped);
    }

    #[tokio::test]
    async fn test_huge_timeout_means_no_deadline() {
        let (_dir, exec) = local();
        let wf = Workflow::from_yaml(
            r#"
on: push
jobs:
  ok:
    steps:
      - run: echo fine
  big:
    timeout-minutes: 18446744073709551615
    steps:
      - run: exit 1
"#,
        )
        .unwrap();

        let report = Runner::new(exec).run(&wf).await.unwrap();
        assert!(!report.success());
        assert_eq!(report.jobs.len(), 2);
        let big = report.job("big").unwrap();
        assert_eq!(big.status, JobStatus::Failure);
        assert_eq!(big.steps[0].exit_code, Some(1));
    }
}
