//! The built-in CI workflow: build + test, WASM check, format and clippy.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use super::{EventFilter, Job, Step, Triggers, Workflow, DEFAULT_TIMEOUT_MINUTES};

pub const WASM_TARGET: &str = "wasm32-unknown-unknown";

fn job(name: &str, toolchain: Step, commands: &[(&str, &str)]) -> Job {
    let mut steps = vec![Step::uses("actions/checkout@v4"), toolchain];
    steps.extend(commands.iter().map(|(name, cmd)| Step::run(name, cmd)));
    Job {
        name: Some(name.to_string()),
        runs_on: "ubuntu-latest".to_string(),
        needs: Vec::new(),
        env: BTreeMap::new(),
        timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        steps,
    }
}

/// Workflow run on pushes and pull requests against `main`.
pub fn default_workflow() -> Workflow {
    let toolchain = || Step::uses("dtolnay/rust-toolchain@stable");

    let mut jobs = IndexMap::new();
    jobs.insert(
        "build".to_string(),
        job(
            "Build & Test",
            toolchain(),
            &[
                ("Build", "cargo build --verbose"),
                ("Run tests", "cargo test --verbose"),
            ],
        ),
    );
    jobs.insert(
        "wasm".to_string(),
        job(
            "WASM Check",
            toolchain().with("targets", WASM_TARGET),
            &[("Check wasm32", "cargo check --target wasm32-unknown-unknown")],
        ),
    );
    jobs.insert(
        "fmt".to_string(),
        job(
            "Format",
            toolchain().with("components", "rustfmt"),
            &[("Check formatting", "cargo fmt --all -- --check")],
        ),
    );
    jobs.insert(
        "clippy".to_string(),
        job(
            "Clippy",
            toolchain().with("components", "clippy"),
            &[("Clippy", "cargo clippy --all-targets -- -D warnings")],
        ),
    );

    Workflow {
        name: "CI".to_string(),
        on: Triggers {
            push: Some(EventFilter::branches(["main"])),
            pull_request: Some(EventFilter::branches(["main"])),
        },
        env: BTreeMap::from([("CARGO_TERM_COLOR".to_string(), "always".to_string())]),
        jobs,
    }
}
