//! Human-facing issues: escalation and manual review.
//!
//! Escalation fires when the cooldown tracker gives up on a signature;
//! a manual-review issue is the fallback when no automated fix exists.
//! Both are markdown issues with a bounded log excerpt.

use anyhow::Result;
use tracing::info;

use crate::github::GhClient;
use crate::types::FailedJob;

/// Longest log excerpt embedded in an issue body.
const MAX_LOG_EXCERPT: usize = 2000;

/// Open an escalation issue after repeated automated failures.
pub async fn open_escalation_issue(
    gh: &GhClient,
    run_id: u64,
    signature: &str,
    attempts: u32,
    jobs: &[FailedJob],
) -> Result<String> {
    let title = format!("CI remediation escalation: run {run_id}");
    let body = build_issue_body(
        "Automated remediation gave up",
        &format!(
            "Remediation was attempted **{attempts} time(s)** for this error \
             signature without success. It will not be retried automatically \
             until the tracking entry is cleared."
        ),
        run_id,
        signature,
        jobs,
        &gh.repo,
    );
    let url = gh
        .create_issue(&title, &body, &["mend", "ci-failure", "needs-attention"])
        .await?;
    info!("Escalated run {run_id} to {url}");
    Ok(url)
}

/// Open a manual-review issue when no fix could be produced.
pub async fn open_manual_issue(
    gh: &GhClient,
    run_id: u64,
    signature: &str,
    jobs: &[FailedJob],
) -> Result<String> {
    let title = format!("CI failure needs manual review: run {run_id}");
    let body = build_issue_body(
        "No automated fix available",
        "Neither the deterministic fixers nor the AI assistants produced a \
         safe fix for this failure.",
        run_id,
        signature,
        jobs,
        &gh.repo,
    );
    let url = gh
        .create_issue(&title, &body, &["mend", "ci-failure", "manual-review"])
        .await?;
    info!("Opened manual-review issue for run {run_id}: {url}");
    Ok(url)
}

fn build_issue_body(
    heading: &str,
    summary: &str,
    run_id: u64,
    signature: &str,
    jobs: &[FailedJob],
    repo: &str,
) -> String {
    let mut body = String::new();

    body.push_str(&format!("## {heading}\n\n{summary}\n\n"));
    body.push_str("### Failure details\n\n");
    body.push_str(&format!(
        "- **Run**: https://github.com/{repo}/actions/runs/{run_id}\n"
    ));
    body.push_str(&format!("- **Error signature**: `{signature}`\n"));
    body.push_str(&format!("- **Failed jobs**: {}\n\n", job_names(jobs)));

    if let Some(job) = jobs.iter().find(|j| !j.annotations.is_empty()) {
        body.push_str("### Annotations\n\n");
        for annotation in job.annotations.iter().take(10) {
            body.push_str(&format!(
                "- `{}` line {}: {}\n",
                annotation.path, annotation.start_line, annotation.message
            ));
        }
        body.push('\n');
    }

    if let Some(job) = jobs.iter().find(|j| !j.log_text.is_empty()) {
        body.push_str("### Log excerpt\n\n```\n");
        body.push_str(&log_excerpt(&job.log_text));
        body.push_str("\n```\n\n");
    }

    body.push_str("---\n*Opened automatically by mend.*\n");
    body
}

fn job_names(jobs: &[FailedJob]) -> String {
    if jobs.is_empty() {
        return "unknown".to_string();
    }
    jobs.iter()
        .map(|j| format!("`{}`", j.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn log_excerpt(log: &str) -> &str {
    if log.len() <= MAX_LOG_EXCERPT {
        return log;
    }
    let mut cut = log.len() - MAX_LOG_EXCERPT;
    while !log.is_char_boundary(cut) {
        cut += 1;
    }
    &log[cut..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Annotation;

    fn sample_jobs() -> Vec<FailedJob> {
        vec![FailedJob {
            id: 7,
            name: "build".into(),
            annotations: vec![Annotation {
                path: "src/A.cs".into(),
                start_line: 42,
                end_line: 42,
                severity: "failure".into(),
                message: "CS0101: duplicate definition".into(),
            }],
            log_text: "Build FAILED with 1 error(s)".into(),
        }]
    }

    #[test]
    fn test_issue_body_contents() {
        let body = build_issue_body(
            "No automated fix available",
            "summary text",
            12345,
            "CS0101: duplicate definition",
            &sample_jobs(),
            "acme/widgets",
        );

        assert!(body.contains("actions/runs/12345"));
        assert!(body.contains("CS0101"));
        assert!(body.contains("`build`"));
        assert!(body.contains("src/A.cs"));
        assert!(body.contains("Build FAILED"));
    }

    #[test]
    fn test_long_log_truncated_from_front() {
        let long = format!("{}END", "x".repeat(5000));
        let excerpt = log_excerpt(&long);
        assert!(excerpt.len() <= MAX_LOG_EXCERPT);
        assert!(excerpt.ends_with("END"));
    }
}
