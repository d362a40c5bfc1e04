//! Resolution of workflow steps into executable actions.

use serde::{Deserialize, Serialize};

use super::Step;
use crate::error::{Result, WorkflowError};

/// What a step does once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Check out the repository. The runner's workspace already is the checkout.
    Checkout,
    /// Install a Rust toolchain with extra targets and components.
    Toolchain(Toolchain),
    /// Dependency cache warm-up; handled by the executor's own caching.
    Cache,
    /// Shell command.
    Run { command: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub channel: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
}

impl Toolchain {
    pub fn stable() -> Self {
        Self {
            channel: "stable".to_string(),
            targets: Vec::new(),
            components: Vec::new(),
        }
    }

    /// `rustup` invocation that installs the channel with its targets and components.
    pub fn setup_command(&self) -> String {
        let mut cmd = format!(
            "rustup toolchain install {} --profile minimal --no-self-update",
            self.channel
        );
        if !self.targets.is_empty() {
            cmd.push_str(" --target ");
            cmd.push_str(&self.targets.join(","));
        }
        if !self.components.is_empty() {
            cmd.push_str(" --component ");
            cmd.push_str(&self.components.join(","));
        }
        cmd
    }
}

impl Action {
    /// Shell command that performs the action, if it runs anything at all.
    pub fn command(&self) -> Option<String> {
        match self {
            Action::Run { command } => Some(command.clone()),
            Action::Toolchain(toolchain) => Some(toolchain.setup_command()),
            Action::Checkout | Action::Cache => None,
        }
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split([',', ' ', '\n'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Step {
    /// Resolve the step into an [`Action`].
    pub fn action(&self) -> Result<Action> {
        if let Some(command) = &self.run {
            return Ok(Action::Run {
                command: command.clone(),
            });
        }

        let uses = self.uses.as_deref().unwrap_or_default();
        let (repo, reference) = uses.split_once('@').unwrap_or((uses, ""));

        match repo {
            "actions/checkout" => Ok(Action::Checkout),
            "Swatinem/rust-cache" => Ok(Action::Cache),
            "dtolnay/rust-toolchain" => {
                // The git ref doubles as the channel (`@stable`, `@1.85`) unless
                // the `toolchain` input overrides it.
                let channel = self.input("toolchain").unwrap_or_else(|| match reference {
                    "" | "master" | "v1" => "stable".to_string(),
                    other => other.to_string(),
                });
                Ok(Action::Toolchain(Toolchain {
                    channel,
                    targets: split_list(self.input("targets")),
                    components: split_list(self.input("components")),
                }))
            }
            "actions-rs/toolchain" => Ok(Action::Toolchain(Toolchain {
                channel: self.input("toolchain").unwrap_or_else(|| "stable".to_string()),
                targets: split_list(self.input("target")),
                components: split_list(self.input("components")),
            })),
            _ => Err(WorkflowError::UnsupportedAction(uses.to_string())),
        }
    }
}
