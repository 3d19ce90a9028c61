//! Structured error collection for a failed workflow run.
//!
//! Fetches the run's failed jobs, their check-run annotations, and raw
//! logs. When the annotations API is inaccessible (permission denial
//! returns a non-array), annotations are synthesized by scanning the job
//! log with a toolchain-aware error-line pattern. Runner-absolute paths
//! are normalized to repository-relative form and logs are truncated to a
//! bounded tail. Nothing in this module is fatal: degraded data simply
//! yields fewer matches downstream.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::github::GhClient;
use crate::types::{Annotation, FailedJob};

/// Compiler error lines: `path(line,col): error CODE: message`.
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?P<path>[^\s(]+)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>error|warning)\s+(?P<code>[A-Za-z]+\d+):\s*(?P<msg>.+)$")
        .unwrap()
});

/// Runner workspace prefix, Unix form: `.../work/<org>/<repo>/`.
static RUNNER_PREFIX_UNIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/.*?/work/[^/]+/[^/]+/").unwrap());

/// Runner workspace prefix, Windows form: `C:\a\<org>\<repo>\`.
static RUNNER_PREFIX_WIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:\\(?:a|work)\\[^\\]+\\[^\\]+\\").unwrap());

/// Error collector for one repository.
pub struct ErrorCollector {
    gh: GhClient,
    log_tail_lines: usize,
}

impl ErrorCollector {
    /// Create a new collector.
    #[must_use]
    pub fn new(gh: GhClient, log_tail_lines: usize) -> Self {
        Self { gh, log_tail_lines }
    }

    /// Collect all failed jobs of a run with annotations and log tails.
    pub async fn collect(&self, run_id: u64) -> Vec<FailedJob> {
        let records = match self.gh.list_failed_jobs(run_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to list jobs for run {run_id}: {e}");
                return Vec::new();
            }
        };

        let mut jobs = Vec::new();
        for record in records {
            let log_raw = self.gh.job_log(record.id).await.unwrap_or_default();
            let log_text = tail_lines(&log_raw, self.log_tail_lines);

            let annotations = match self.gh.annotations(record.id).await {
                Ok(serde_json::Value::Array(items)) => parse_annotations(&items),
                _ => {
                    debug!(
                        "No annotation array for job {} ({}), synthesizing from log",
                        record.id, record.name
                    );
                    synthesize_annotations(&log_text)
                }
            };

            jobs.push(FailedJob {
                id: record.id,
                name: record.name,
                annotations,
                log_text,
            });
        }
        jobs
    }
}

/// Keep the last `n` lines of a log.
#[must_use]
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= n {
        return text.to_string();
    }
    lines[lines.len() - n..].join("\n")
}

/// Parse the annotations API array into our model, normalizing paths.
fn parse_annotations(items: &[serde_json::Value]) -> Vec<Annotation> {
    items
        .iter()
        .filter_map(|item| {
            let message = item.get("message")?.as_str()?.to_string();
            Some(Annotation {
                path: normalize_path(item.get("path").and_then(|v| v.as_str()).unwrap_or("")),
                start_line: item.get("start_line").and_then(|v| v.as_u64()).unwrap_or(0),
                end_line: item.get("end_line").and_then(|v| v.as_u64()).unwrap_or(0),
                severity: item
                    .get("annotation_level")
                    .and_then(|v| v.as_str())
                    .unwrap_or("failure")
                    .to_string(),
                message,
            })
        })
        .collect()
}

/// Synthesize annotations from compiler error lines in a job log.
#[must_use]
pub fn synthesize_annotations(log_text: &str) -> Vec<Annotation> {
    ERROR_LINE
        .captures_iter(log_text)
        .map(|cap| Annotation {
            path: normalize_path(&cap["path"]),
            start_line: cap["line"].parse().unwrap_or(0),
            end_line: cap["line"].parse().unwrap_or(0),
            severity: if &cap["sev"] == "error" {
                "failure".to_string()
            } else {
                "warning".to_string()
            },
            message: format!("{}: {}", &cap["code"], cap["msg"].trim()),
        })
        .collect()
}

/// Strip a CI-runner workspace prefix, leaving a repo-relative path with
/// forward slashes.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let stripped = RUNNER_PREFIX_WIN.replace(path, "");
    let stripped = RUNNER_PREFIX_UNIX.replace(&stripped, "");
    stripped.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_lines_bounds_log() {
        let log = (0..500).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = tail_lines(&log, 400);
        assert_eq!(tail.lines().count(), 400);
        assert!(tail.starts_with("line 100"));
        assert!(tail.ends_with("line 499"));

        let short = tail_lines("a\nb", 400);
        assert_eq!(short, "a\nb");
    }

    #[test]
    fn test_synthesize_from_compiler_lines() {
        let log = "\
Determining projects to restore...
/home/runner/work/acme/widgets/src/Orders/OrderService.cs(42,13): error CS0101: The namespace 'Acme.Orders' already contains a definition for 'Order'
/home/runner/work/acme/widgets/src/Orders/Order.cs(7,5): warning CS0414: The field 'Order._id' is assigned but never used
Build FAILED.";

        let annotations = synthesize_annotations(log);
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].path, "src/Orders/OrderService.cs");
        assert_eq!(annotations[0].start_line, 42);
        assert_eq!(annotations[0].severity, "failure");
        assert!(annotations[0].message.contains("CS0101"));
        assert_eq!(annotations[1].severity, "warning");
    }

    #[test]
    fn test_normalize_windows_runner_path() {
        assert_eq!(
            normalize_path(r"D:\a\acme\widgets\src\Program.cs"),
            "src/Program.cs"
        );
        assert_eq!(
            normalize_path("/home/runner/work/acme/widgets/src/Program.cs"),
            "src/Program.cs"
        );
        // Already-relative paths pass through untouched
        assert_eq!(normalize_path("src/Program.cs"), "src/Program.cs");
    }
}
