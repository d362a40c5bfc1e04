//! Metrics emitted while running workflows. Binaries decide where they go.

use metrics::{counter, histogram};

/// Record step duration.
pub fn step_duration(step_name: &str, duration_ms: u64) {
    histogram!("ci_step_duration_ms", "step" => step_name.to_string()).record(duration_ms as f64);
}

/// Record a finished job.
pub fn job_finished(job_id: &str, status: &str, duration_ms: u64) {
    counter!("ci_jobs_total", "job" => job_id.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!("ci_job_duration_ms", "job" => job_id.to_string()).record(duration_ms as f64);
}

/// Record an error occurrence.
pub fn error_recorded(category: &str) {
    counter!("ci_errors_total", "category" => category.to_string()).increment(1);
}
