//! Job ordering from the `needs` graph.
//!
//! Jobs are grouped into layers: every job in a layer only needs jobs from
//! earlier layers, so a layer can run concurrently. Within a layer jobs keep
//! their declaration order.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, WorkflowError};
use crate::workflow::Workflow;

/// Compute execution layers, validating dependencies along the way.
pub fn plan(workflow: &Workflow) -> Result<Vec<Vec<String>>> {
    for (id, job) in &workflow.jobs {
        for dep in &job.needs {
            if dep == id {
                return Err(WorkflowError::SelfDependency(id.clone()));
            }
            if !workflow.jobs.contains_key(dep) {
                return Err(WorkflowError::MissingDependency {
                    job: id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    let mut done: HashSet<&str> = HashSet::new();
    let mut layers = Vec::new();

    while done.len() < workflow.jobs.len() {
        let layer: Vec<&str> = workflow
            .jobs
            .iter()
            .filter(|(id, _)| !done.contains(id.as_str()))
            .filter(|(_, job)| job.needs.iter().all(|d| done.contains(d.as_str())))
            .map(|(id, _)| id.as_str())
            .collect();

        if layer.is_empty() {
            return Err(WorkflowError::CyclicDependency {
                cycle: find_cycle(workflow, &done),
            });
        }

        done.extend(layer.iter().copied());
        layers.push(layer.into_iter().map(str::to_string).collect());
    }

    Ok(layers)
}

/// Walk `needs` edges from the first unfinished job until a job repeats.
fn find_cycle(workflow: &Workflow, done: &HashSet<&str>) -> Vec<String> {
    let Some(start) = workflow.job_ids().find(|id| !done.contains(id)) else {
        return Vec::new();
    };

    let mut path: Vec<&str> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&pos) = seen.get(current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(current.to_string());
            return cycle;
        }
        seen.insert(current, path.len());
        path.push(current);

        let next = workflow
            .job(current)
            .and_then(|job| job.needs.iter().find(|d| !done.contains(d.as_str())));
        match next {
            Some(next) => current = next.as_str(),
            None => return path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::default_workflow;

    fn workflow(jobs: &[(&str, &[&str])]) -> Workflow {
        let mut yaml = String::from("on: push\njobs:\n");
        for (id, needs) in jobs {
            yaml.push_str(&format!(
                "  {id}:\n    needs: [{}]\n    steps: [ {{ run: \"true\" }} ]\n",
                needs.join(", ")
            ));
        }
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_default_workflow_is_one_layer() {
        let layers = plan(&default_workflow()).unwrap();
        assert_eq!(layers, vec![vec!["build", "wasm", "fmt", "clippy"]]);
    }

    #[test]
    fn test_layers_follow_needs() {
        let wf = workflow(&[
            ("deploy", &["test", "lint"]),
            ("build", &[]),
            ("test", &["build"]),
            ("lint", &[]),
        ]);
        let layers = plan(&wf).unwrap();
        assert_eq!(
            layers,
            vec![vec!["build", "lint"], vec!["test"], vec!["deploy"]]
        );
    }

    #[test]
    fn test_missing_dependency() {
        let wf = workflow(&[("a", &["ghost"])]);
        let err = plan(&wf).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::MissingDependency { ref job, ref missing } if job == "a" && missing == "ghost"
        ));
    }

    #[test]
    fn test_self_dependency() {
        let wf = workflow(&[("a", &["a"])]);
        assert!(matches!(plan(&wf).unwrap_err(), WorkflowError::SelfDependency(id) if id == "a"));
    }

    #[test]
    fn test_cycle_is_reported() {
        let wf = workflow(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let err = plan(&wf).unwrap_err();
        let WorkflowError::CyclicDependency { cycle } = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(!cycle.contains(&"d".to_string()));
    }
}
