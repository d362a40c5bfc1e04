mod containers;
mod dagger_executor;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use ci_core::{default_workflow, Event, LocalExecutor, RunReport, Runner, Workflow, DEFAULT_WORKFLOW_PATH};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "ci-pipeline", about = "Tubereng CI/CD Pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline (build + wasm + fmt + clippy)
    All(RunArgs),
    /// Build and unit tests
    Build(RunArgs),
    /// wasm32-unknown-unknown compile check
    Wasm(RunArgs),
    /// Format check
    Fmt(RunArgs),
    /// Clippy lint
    Lint(RunArgs),
    /// Run the named jobs of the workflow
    Job {
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load and validate the workflow, then list its triggers and jobs
    Validate(SourceArgs),
    /// Write the built-in workflow to .github/workflows/ci.yml
    Generate {
        #[command(flatten)]
        source: SourceArgs,
        /// Overwrite an existing workflow file
        #[arg(long)]
        force: bool,
    },
    /// Exit 0 if the event triggers the workflow, 1 otherwise
    #[command(name = "should-run")]
    ShouldRun {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, value_enum)]
        event: EventKind,
        /// Pushed branch, or the pull request's base branch
        #[arg(long)]
        branch: String,
        /// Pull request activity
        #[arg(long, default_value = "opened")]
        action: String,
    },
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Repository root
    #[arg(long, default_value = ".")]
    source: PathBuf,
    /// Workflow file (defaults to <source>/.github/workflows/ci.yml, then the built-in one)
    #[arg(long)]
    workflow: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, value_enum, default_value_t = Engine::Local)]
    engine: Engine,
    /// Write the JSON run report here
    #[arg(long)]
    report: Option<PathBuf>,
    /// Maximum jobs running at once
    #[arg(long)]
    max_parallel: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// Child processes on this machine
    Local,
    /// Containers through the Dagger engine
    Dagger,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EventKind {
    Push,
    PullRequest,
}

fn resolve_workflow(args: &SourceArgs) -> eyre::Result<Workflow> {
    if let Some(path) = &args.workflow {
        return Ok(Workflow::load(path)?);
    }
    match Workflow::load_from_repo(&args.source)? {
        Some(workflow) => Ok(workflow),
        None => {
            tracing::info!("No workflow in repository, using the built-in one");
            Ok(default_workflow())
        }
    }
}

/// Run the workflow (or a subset of its jobs). Returns whether the run passed.
async fn run_jobs(args: RunArgs, jobs: Option<Vec<String>>) -> eyre::Result<bool> {
    let workflow = resolve_workflow(&args.source)?;
    let configure = move |mut runner: Runner| {
        if let Some(jobs) = jobs {
            runner = runner.with_jobs(jobs);
        }
        if let Some(n) = args.max_parallel {
            runner = runner.with_max_parallel(n);
        }
        runner
    };

    let report = match args.engine {
        Engine::Local => {
            let source = args.source.source.canonicalize()?;
            let runner = configure(Runner::new(Arc::new(LocalExecutor::new(source))));
            runner.run(&workflow).await?
        }
        Engine::Dagger => {
            let source = args.source.source.to_string_lossy().into_owned();
            let slot: Arc<Mutex<Option<RunReport>>> = Arc::new(Mutex::new(None));
            let out = slot.clone();

            dagger_sdk::connect(move |client| async move {
                let src = containers::host_directory(&client, &source);
                let executor = dagger_executor::DaggerExecutor::new(client.clone(), src);
                let report = configure(Runner::new(Arc::new(executor)))
                    .run(&workflow)
                    .await?;
                if let Ok(mut guard) = out.lock() {
                    *guard = Some(report);
                }
                Ok(())
            })
            .await?;

            let report = slot.lock().ok().and_then(|mut guard| guard.take());
            report.ok_or_else(|| eyre::eyre!("Dagger session ended without a report"))?
        }
    };

    println!("{report}");

    if let Some(path) = &args.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        tracing::info!(path = %path.display(), "Report written");
    }

    Ok(report.success())
}

fn validate(args: &SourceArgs) -> eyre::Result<bool> {
    let workflow = resolve_workflow(args)?;
    println!("Workflow: {}", workflow.name);
    if let Some(push) = &workflow.on.push {
        println!("  on push: {}", branches(&push.branches));
    }
    if let Some(pr) = &workflow.on.pull_request {
        println!("  on pull_request: {}", branches(&pr.branches));
    }
    for (id, job) in &workflow.jobs {
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" (needs {})", job.needs.join(", "))
        };
        println!(
            "  [{id}] {} on {}: {} steps{needs}",
            job.display_name(id),
            job.runs_on,
            job.steps.len()
        );
    }
    Ok(true)
}

fn branches(list: &[String]) -> String {
    if list.is_empty() {
        "all branches".to_string()
    } else {
        list.join(", ")
    }
}

fn generate(source: &Path, force: bool) -> eyre::Result<bool> {
    let path = source.join(DEFAULT_WORKFLOW_PATH);
    if path.exists() && !force {
        eyre::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, default_workflow().to_yaml()?)?;
    println!("Wrote {}", path.display());
    Ok(true)
}

fn should_run(args: &SourceArgs, event: EventKind, branch: &str, action: &str) -> eyre::Result<bool> {
    let workflow = resolve_workflow(args)?;
    let event = match event {
        EventKind::Push => Event::push(branch),
        EventKind::PullRequest => Event::pull_request(action, branch, "", 0),
    };
    let triggered = workflow.should_run(&event);
    println!("{}", if triggered { "triggered" } else { "not triggered" });
    Ok(triggered)
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Cli { command } = Cli::parse();

    let passed = match command {
        Command::All(run) => run_jobs(run, None).await,
        Command::Build(run) => run_jobs(run, Some(vec!["build".to_string()])).await,
        Command::Wasm(run) => run_jobs(run, Some(vec!["wasm".to_string()])).await,
        Command::Fmt(run) => run_jobs(run, Some(vec!["fmt".to_string()])).await,
        Command::Lint(run) => run_jobs(run, Some(vec!["clippy".to_string()])).await,
        Command::Job { ids, run } => run_jobs(run, Some(ids)).await,
        Command::Validate(source) => validate(&source),
        Command::Generate { source, force } => generate(&source.source, force),
        Command::ShouldRun {
            source,
            event,
            branch,
            action,
        } => should_run(&source, event, &branch, &action),
    }?;

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_stage_commands() {
        let cli = Cli::try_parse_from(["ci-pipeline", "wasm", "--source", "/repo", "--engine", "dagger"]).unwrap();
        let Command::Wasm(run) = cli.command else {
            panic!("expected wasm");
        };
        assert_eq!(run.source.source, PathBuf::from("/repo"));
        assert!(run.engine == Engine::Dagger);

        let cli = Cli::try_parse_from(["ci-pipeline", "job", "build", "fmt"]).unwrap();
        let Command::Job { ids, run } = cli.command else {
            panic!("expected job");
        };
        assert_eq!(ids, vec!["build", "fmt"]);
        assert!(run.engine == Engine::Local);
    }

    #[test]
    fn test_cli_requires_job_ids() {
        assert!(Cli::try_parse_from(["ci-pipeline", "job"]).is_err());
    }

    #[test]
    fn test_should_run_parses_pull_request() {
        let cli = Cli::try_parse_from([
            "ci-pipeline",
            "should-run",
            "--event",
            "pull-request",
            "--branch",
            "main",
        ])
        .unwrap();
        let Command::ShouldRun { event, action, .. } = cli.command else {
            panic!("expected should-run");
        };
        assert!(event == EventKind::PullRequest);
        assert_eq!(action, "opened");
    }

    #[test]
    fn test_resolve_workflow_prefers_repository_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = SourceArgs {
            source: dir.path().to_path_buf(),
            workflow: None,
        };
        assert_eq!(resolve_workflow(&args).unwrap(), default_workflow());

        let path = dir.path().join(DEFAULT_WORKFLOW_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "name: Mine\non: push\njobs:\n  a:\n    steps: [ { run: \"true\" } ]\n").unwrap();
        assert_eq!(resolve_workflow(&args).unwrap().name, "Mine");
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        generate(dir.path(), false).unwrap();

        let written = Workflow::load(dir.path().join(DEFAULT_WORKFLOW_PATH)).unwrap();
        assert_eq!(written, default_workflow());

        assert!(generate(dir.path(), false).is_err());
        assert!(generate(dir.path(), true).is_ok());
    }

    #[tokio::test]
    async fn test_local_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let wf_path = dir.path().join("wf.yml");
        std::fs::write(
            &wf_path,
            "on: push\njobs:\n  ok:\n    steps: [ { run: \"echo fine\" } ]\n  bad:\n    steps: [ { run: \"exit 2\" } ]\n",
        )
        .unwrap();
        let report_path = dir.path().join("report.json");

        let args = RunArgs {
            source: SourceArgs {
                source: dir.path().to_path_buf(),
                workflow: Some(wf_path),
            },
            engine: Engine::Local,
            report: Some(report_path.clone()),
            max_parallel: None,
        };
        let passed = run_jobs(args.clone(), Some(vec!["ok".to_string()])).await.unwrap();
        assert!(passed);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(report["jobs"][0]["id"], "ok");
        assert_eq!(report["jobs"][0]["status"], "success");

        let passed = run_jobs(args, None).await.unwrap();
        assert!(!passed);
    }
}
