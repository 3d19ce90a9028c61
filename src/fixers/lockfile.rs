//! Lockfile resynchronizer.
//!
//! When CI fails because a package lockfile drifted from its manifest,
//! regenerating the lockfile is the whole fix: clone shallowly, run the
//! package manager's lockfile-only install, and open a PR when the tree
//! changed. A failing install is tolerated; whatever it managed to write
//! still gets diffed.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::shell;
use crate::github::GhClient;
use crate::process::ProcessRunner;
use crate::types::FailedJob;

/// Package managers we can resynchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pnpm,
}

impl PackageManager {
    fn install_args(self) -> (&'static str, Vec<String>) {
        match self {
            Self::Npm => (
                "npm",
                vec!["install".into(), "--package-lock-only".into()],
            ),
            Self::Pnpm => ("pnpm", vec!["install".into(), "--lockfile-only".into()]),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
        }
    }
}

static NPM_DESYNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)npm ci.*can only install|package-lock\.json.*(?:out of (?:sync|date)|missing)|lock file.*out of (?:sync|date)",
    )
    .unwrap()
});

static PNPM_DESYNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)pnpm-lock\.yaml is not up to date|ERR_PNPM_OUTDATED_LOCKFILE").unwrap()
});

/// Detect a lockfile-desync trigger in the failed jobs.
#[must_use]
pub fn triggered(jobs: &[FailedJob]) -> Option<PackageManager> {
    for job in jobs {
        if PNPM_DESYNC.is_match(&job.log_text) {
            return Some(PackageManager::Pnpm);
        }
        if NPM_DESYNC.is_match(&job.log_text) {
            return Some(PackageManager::Npm);
        }
    }
    None
}

/// Regenerate the lockfile and open a PR when it changed.
///
/// Returns the PR URL, or `None` when the install produced no diff.
pub async fn run(
    manager: PackageManager,
    repo: &str,
    branch: &str,
    gh: &GhClient,
    runner: &dyn ProcessRunner,
    timeout: Duration,
) -> Result<Option<String>> {
    let scratch = shell::scratch_dir("lockfile");
    let result = run_inner(manager, repo, branch, gh, runner, timeout, &scratch).await;
    shell::cleanup(&scratch);
    result
}

async fn run_inner(
    manager: PackageManager,
    repo: &str,
    branch: &str,
    gh: &GhClient,
    runner: &dyn ProcessRunner,
    timeout: Duration,
    scratch: &std::path::Path,
) -> Result<Option<String>> {
    shell::shallow_clone(runner, repo, branch, scratch, timeout).await?;

    let (program, args) = manager.install_args();
    let install = runner
        .run(program, &args, Some(scratch), None, timeout)
        .await?;
    if !install.success() {
        // Tolerated: a partial resolve can still have rewritten the lockfile
        warn!(
            "{} install exited {}, diffing anyway",
            manager.label(),
            install.exit_code
        );
    }

    let changed = shell::changed_files(runner, scratch, timeout).await?;
    if changed.is_empty() {
        info!("Lockfile already in sync, nothing to commit");
        return Ok(None);
    }

    let fix_branch = format!("mend/lockfile-{}", Uuid::new_v4().simple());
    let title = format!("Resynchronize {} lockfile", manager.label());
    let body = format!(
        "The {} lockfile drifted from its manifest and broke CI on `{branch}`.\n\n\
         Regenerated with a lockfile-only install. Files changed:\n{}",
        manager.label(),
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
            name: "install".into(),
            annotations: vec![],
            log_text: log.into(),
        }
    }

    #[test]
    fn test_npm_desync_detected() {
        let jobs = vec![job_with_log(
            "npm ci` can only install packages when your package.json and package-lock.json are in sync",
        )];
        assert_eq!(triggered(&jobs), Some(PackageManager::Npm));
    }

    #[test]
    fn test_pnpm_desync_detected() {
        let jobs = vec![job_with_log("ERR_PNPM_OUTDATED_LOCKFILE  Cannot install")];
        assert_eq!(triggered(&jobs), Some(PackageManager::Pnpm));
    }

    #[test]
    fn test_clean_install_log_not_triggered() {
        let jobs = vec![job_with_log("added 120 packages in 4s")];
        assert!(triggered(&jobs).is_none());
    }
}
