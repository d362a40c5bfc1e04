//! Workflow definition: the subset of GitHub Actions syntax the CI file uses.
//!
//! A workflow has triggers (`on:`), shared environment, and an ordered set of
//! jobs. Jobs are independent unless linked with `needs:`; each job runs its
//! steps in order. Steps are either shell commands (`run:`) or one of the
//! Rust setup actions understood by [`Step::action`].

mod action;
mod default;

use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, WorkflowError};
use crate::plan;
use crate::trigger::Event;

pub use action::{Action, Toolchain};
pub use default::default_workflow;

/// Where the workflow lives inside a repository.
pub const DEFAULT_WORKFLOW_PATH: &str = ".github/workflows/ci.yml";

/// Upper bound on workflow file size.
pub const MAX_WORKFLOW_BYTES: u64 = 1024 * 1024;

/// GitHub's default job timeout.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 360;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "default_name")]
    pub name: String,
    pub on: Triggers,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub jobs: IndexMap<String, Job>,
}

fn default_name() -> String {
    "CI".to_string()
}

/// Events that start the workflow. `None` means the event is not a trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "TriggersRepr", into = "TriggerMap")]
pub struct Triggers {
    pub push: Option<EventFilter>,
    pub pull_request: Option<EventFilter>,
}

/// Branch (and, for pull requests, activity type) filter of a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches_ignore: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
}

impl EventFilter {
    pub fn branches<I, S>(branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: branches.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TriggersRepr {
    Single(String),
    List(Vec<String>),
    Map(TriggerMap),
}

#[derive(Default, Serialize, Deserialize)]
struct TriggerMap {
    #[serde(
        default,
        deserialize_with = "present_filter",
        skip_serializing_if = "Option::is_none"
    )]
    push: Option<EventFilter>,
    #[serde(
        default,
        deserialize_with = "present_filter",
        skip_serializing_if = "Option::is_none"
    )]
    pull_request: Option<EventFilter>,
}

/// `push:` with no body still enables the trigger.
fn present_filter<'de, D>(deserializer: D) -> std::result::Result<Option<EventFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(Option::<EventFilter>::deserialize(deserializer)?.unwrap_or_default()))
}

impl From<TriggersRepr> for Triggers {
    fn from(repr: TriggersRepr) -> Self {
        let names = match repr {
            TriggersRepr::Map(map) => {
                return Triggers {
                    push: map.push,
                    pull_request: map.pull_request,
                }
            }
            TriggersRepr::Single(name) => vec![name],
            TriggersRepr::List(names) => names,
        };

        let mut triggers = Triggers::default();
        for name in names {
            match name.as_str() {
                "push" => triggers.push = Some(EventFilter::default()),
                "pull_request" => triggers.pull_request = Some(EventFilter::default()),
                other => tracing::debug!(event = other, "Ignoring unsupported workflow trigger"),
            }
        }
        triggers
    }
}

impl From<Triggers> for TriggerMap {
    fn from(triggers: Triggers) -> Self {
        TriggerMap {
            push: triggers.push,
            pull_request: triggers.pull_request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Job {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_runs_on")]
    pub runs_on: String,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(
        default = "default_timeout_minutes",
        skip_serializing_if = "is_default_timeout"
    )]
    pub timeout_minutes: u64,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_runs_on() -> String {
    "ubuntu-latest".to_string()
}

fn default_timeout_minutes() -> u64 {
    DEFAULT_TIMEOUT_MINUTES
}

fn is_default_timeout(minutes: &u64) -> bool {
    *minutes == DEFAULT_TIMEOUT_MINUTES
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

impl Job {
    /// Human-facing name, falling back to the job id.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
}

impl Step {
    pub fn run(name: &str, command: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            run: Some(command.to_string()),
            ..Self::default()
        }
    }

    pub fn uses(action: &str) -> Self {
        Self {
            uses: Some(action.to_string()),
            ..Self::default()
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.with
            .insert(key.to_string(), serde_yaml::Value::String(value.to_string()));
        self
    }

    /// Step label used in logs and reports.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(run) = &self.run {
            let first = run.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            return format!("Run {}", first.trim());
        }
        self.uses.clone().unwrap_or_else(|| "step".to_string())
    }

    /// Scalar `with:` input rendered as a string.
    pub fn input(&self, key: &str) -> Option<String> {
        match self.with.get(key)? {
            serde_yaml::Value::String(s) => Some(s.clone()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl Workflow {
    /// Parse and validate a workflow document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(text)?;
        workflow.validate()?;
        Ok(workflow)
    }

    /// Read, parse and validate a workflow file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let read_err = |source| WorkflowError::Read {
            path: path.to_path_buf(),
            source,
        };

        let size = std::fs::metadata(path).map_err(read_err)?.len();
        if size > MAX_WORKFLOW_BYTES {
            return Err(WorkflowError::TooLarge {
                path: path.to_path_buf(),
                size,
                max: MAX_WORKFLOW_BYTES,
            });
        }

        let text = std::fs::read_to_string(path).map_err(read_err)?;
        let workflow = Self::from_yaml(&text)?;
        tracing::debug!(
            path = %path.display(),
            jobs = workflow.jobs.len(),
            "Loaded workflow"
        );
        Ok(workflow)
    }

    /// Load `<dir>/.github/workflows/ci.yml` if the repository has one.
    pub fn load_from_repo(dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = dir.as_ref().join(DEFAULT_WORKFLOW_PATH);
        if !path.is_file() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Whether the event triggers this workflow.
    pub fn should_run(&self, event: &Event) -> bool {
        self.on.matches(event)
    }

    /// Structural checks: ids, steps, actions and the `needs` graph.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(WorkflowError::NoJobs);
        }

        for (id, job) in &self.jobs {
            let id_ok = !id.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !id_ok {
                return Err(WorkflowError::InvalidJobId(id.clone()));
            }
            if job.steps.is_empty() {
                return Err(WorkflowError::NoSteps(id.clone()));
            }

            for (index, step) in job.steps.iter().enumerate() {
                let invalid = |reason: &str| WorkflowError::InvalidStep {
                    job: id.clone(),
                    index: index + 1,
                    reason: reason.to_string(),
                };
                match (&step.run, &step.uses) {
                    (Some(_), Some(_)) => return Err(invalid("has both 'run' and 'uses'")),
                    (None, None) => return Err(invalid("needs either 'run' or 'uses'")),
                    (Some(run), None) if run.trim().is_empty() => {
                        return Err(invalid("'run' is empty"))
                    }
                    _ => {}
                }
                step.action()?;
            }
        }

        plan::plan(self)?;
        Ok(())
    }
}
