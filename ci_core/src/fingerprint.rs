//! Error fingerprinting for failed steps.
//!
//! Output is normalized (numbers, paths, whitespace) before hashing so the
//! same failure reported on different lines or machines groups together.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

static NUMERIC_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
static PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/[a-zA-Z0-9_./-]+").unwrap());

const MAX_TITLE_CHARS: usize = 200;

/// A failed step, condensed for reports and status descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub step: String,
    pub fingerprint: String,
    pub category: String,
    pub title: String,
}

/// Normalize error text for fingerprinting: remove numbers, paths, whitespace.
pub fn normalize(text: &str) -> String {
    let text = NUMERIC_REGEX.replace_all(text, "N");
    let text = PATH_REGEX.replace_all(&text, "PATH");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint(normalized: &str) -> String {
    let hash = Sha256::digest(normalized.as_bytes());
    hex::encode(&hash[..16])
}

/// Classify error category from text.
pub fn classify_category(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("diff in") || lower.contains("rustfmt") {
        "format"
    } else if lower.contains("clippy") || lower.contains("#[deny(") || lower.contains("-d warnings") {
        "lint"
    } else if lower.contains("test result: failed") || lower.contains("panicked") || lower.contains("assertion") {
        "test"
    } else if lower.contains("error[e") || lower.contains("could not compile") || lower.contains("cannot find") {
        "compile"
    } else {
        "runtime"
    }
}

/// First line that looks like an error, else the first non-empty line.
fn title(text: &str) -> String {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("error") || l.starts_with("Error") || l.contains("panicked at"))
        .or_else(|| lines.next())
        .unwrap_or("Unknown error");
    line.chars().take(MAX_TITLE_CHARS).collect()
}

pub fn summarize(step: &str, text: &str) -> ErrorSummary {
    let normalized = normalize(text);
    let summary = ErrorSummary {
        step: step.to_string(),
        fingerprint: fingerprint(&normalized),
        category: classify_category(text).to_string(),
        title: title(text),
    };
    crate::metrics::error_recorded(&summary.category);
    summary
}
