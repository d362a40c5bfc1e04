//! Tubereng CI core: workflow model, trigger matching and job runner.
//!
//! The workflow file (`.github/workflows/ci.yml`) is the single source of
//! truth for what CI does. Both the pipeline CLI and the webhook server load
//! it through this crate and hand it to a [`runner::Runner`], which executes
//! the jobs through an [`executor::Executor`] (local processes or containers).

pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod metrics;
pub mod plan;
pub mod runner;
pub mod trigger;
pub mod workflow;

pub use error::{Result, WorkflowError};
pub use executor::{Execution, Executor, LocalExecutor, StepRequest};
pub use runner::{JobReport, JobStatus, RunReport, Runner, StepReport, StepStatus};
pub use trigger::Event;
pub use workflow::{default_workflow, Action, Job, Step, Toolchain, Workflow, DEFAULT_WORKFLOW_PATH};
