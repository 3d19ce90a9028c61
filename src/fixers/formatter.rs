//! Code-formatter runner.
//!
//! When CI fails on formatting verification, running the formatter in
//! write mode against a scratch clone and committing the result is the
//! fix. Same clone/run/diff/PR shape as the lockfile pass.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::shell;
use crate::github::GhClient;
use crate::process::ProcessRunner;
use crate::types::FailedJob;

static FORMAT_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)run 'dotnet format'|dotnet format --verify-no-changes|whitespace formatting errors|IDE0055")
        .unwrap()
});

/// Check whether the run failed on formatting verification.
#[must_use]
pub fn triggered(jobs: &[FailedJob]) -> bool {
    jobs.iter().any(|job| {
        FORMAT_TRIGGER.is_match(&job.log_text)
            || job
                .annotations
                .iter()
                .any(|a| FORMAT_TRIGGER.is_match(&a.message))
    })
}

/// Run the formatter in write mode and open a PR when the tree changed.
pub async fn run(
    repo: &str,
    branch: &str,
    gh: &GhClient,
    runner: &dyn ProcessRunner,
    timeout: Duration,
) -> Result<Option<String>> {
    let scratch = shell::scratch_dir("format");
    let result = run_inner(repo, branch, gh, runner, timeout, &scratch).await;
    shell::cleanup(&scratch);
    result
}

async fn run_inner(
    repo: &str,
    branch: &str,
    gh: &GhClient,
    runner: &dyn ProcessRunner,
    timeout: Duration,
    scratch: &std::path::Path,
) -> Result<Option<String>> {
    shell::shallow_clone(runner, repo, branch, scratch, timeout).await?;

    let format = runner
        .run(
            "dotnet",
            &["format".to_string(), "--no-restore".to_string()],
            Some(scratch),
            None,
            timeout,
        )
        .await?;
    if !format.success() {
        // The formatter reports a nonzero exit for files it rewrote under
        // some configurations; the diff decides whether we have a fix
        info!("dotnet format exited {}, diffing anyway", format.exit_code);
    }

    let changed = shell::changed_files(runner, scratch, timeout).await?;
    if changed.is_empty() {
        info!("Formatter produced no changes");
        return Ok(None);
    }

    let fix_branch = format!("mend/format-{}", Uuid::new_v4().simple());
    let title = "Apply formatter fixes".to_string();
    let body = format!(
        "Formatting verification failed on `{branch}`. Ran the formatter in \
         write mode; {} file(s) changed:\n{}",
        changed.len(),
        changed
            .iter()
            .map(|f| format!("- `{f}`"))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let url = shell::commit_and_open_pr(
        runner, gh, scratch, &fix_branch, branch, &title, &body, timeout,
    )
    .await?;
    Ok(Some(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_log(log: &str) -> FailedJob {
        FailedJob {
            id: 1,
            name: "format-check".into(),
            annotations: vec![],
            log_text: log.into(),
        }
    }

    #[test]
    fn test_verify_failure_triggers() {
        let jobs = vec![job_with_log(
            "error: Fix whitespace formatting. Run 'dotnet format' to fix.",
        )];
        assert!(triggered(&jobs));
    }

    #[test]
    fn test_unrelated_failure_does_not_trigger() {
        let jobs = vec![job_with_log("error CS0101: duplicate definition")];
        assert!(!triggered(&jobs));
    }
}
