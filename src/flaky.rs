//! Transient-infrastructure failure detection.
//!
//! When a run failed on timeouts, connection resets, or similar flaky
//! infrastructure rather than on code, the right remediation is a rerun,
//! not a patch.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::FailedJob;

/// Known transient-infrastructure markers.
static FLAKY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"ETIMEDOUT").unwrap(),
        Regex::new(r"ECONNRESET").unwrap(),
        Regex::new(r"ECONNREFUSED").unwrap(),
        Regex::new(r"(?i)connection (?:reset|refused|timed out)").unwrap(),
        Regex::new(r"(?i)socket hang ?up").unwrap(),
        Regex::new(r"(?i)navigation timeout of \d+ ?ms exceeded").unwrap(),
        Regex::new(r"(?i)net::ERR_").unwrap(),
        Regex::new(r"(?i)temporary failure in name resolution").unwrap(),
        Regex::new(r"(?i)503 Service (?:Temporarily )?Unavailable").unwrap(),
        Regex::new(r"(?i)failed to download|could not resolve host").unwrap(),
    ]
});

/// Check the run's logs for transient-infrastructure markers.
///
/// Returns the first matched marker text. Only meaningful when the run
/// carries no error-level annotations — a compile error next to an
/// ETIMEDOUT is still a compile error.
#[must_use]
pub fn detect(jobs: &[FailedJob]) -> Option<String> {
    for job in jobs {
        for pattern in FLAKY_PATTERNS.iter() {
            if let Some(m) = pattern.find(&job.log_text) {
                return Some(m.as_str().to_string());
            }
        }
    }
    None
}

/// Whether a rerun is the right action: flaky markers present and no
/// error annotations anywhere in the run.
#[must_use]
pub fn should_rerun(jobs: &[FailedJob]) -> Option<String> {
    if jobs.iter().any(FailedJob::has_errors) {
        return None;
    }
    detect(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Annotation;

    fn job_with_log(log: &str) -> FailedJob {
        FailedJob {
            id: 1,
            name: "e2e".into(),
            annotations: vec![],
            log_text: log.into(),
        }
    }

    #[test]
    fn test_detects_timeout_markers() {
        let jobs = vec![job_with_log("request to registry failed: ETIMEDOUT")];
        assert_eq!(detect(&jobs).as_deref(), Some("ETIMEDOUT"));
        assert!(should_rerun(&jobs).is_some());
    }

    #[test]
    fn test_detects_browser_navigation_timeout() {
        let jobs = vec![job_with_log("Navigation timeout of 30000 ms exceeded")];
        assert!(detect(&jobs).is_some());
    }

    #[test]
    fn test_build_error_suppresses_rerun() {
        let mut job = job_with_log("fetch failed: ECONNRESET");
        job.annotations.push(Annotation {
            path: "src/A.cs".into(),
            start_line: 3,
            end_line: 3,
            severity: "failure".into(),
            message: "CS0101: duplicate definition".into(),
        });
        assert!(detect(&[job.clone()]).is_some());
        assert!(should_rerun(&[job]).is_none());
    }

    #[test]
    fn test_clean_logs_do_not_match() {
        let jobs = vec![job_with_log("tests passed, artifacts uploaded")];
        assert!(detect(&jobs).is_none());
    }
}
