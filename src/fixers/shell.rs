//! Shared plumbing for shell-mediated fixers.
//!
//! The lockfile and formatter passes both clone the repository shallowly
//! into a scratch directory, run a tool, diff the tree, and publish a PR
//! only when files actually changed. The scratch directory is removed on
//! every exit path.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::github::GhClient;
use crate::process::ProcessRunner;

/// Allocate a unique scratch directory path (not yet created; git clone
/// creates it).
#[must_use]
pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("mend-{label}-{}", Uuid::new_v4().simple()))
}

/// Shallow-clone one branch of the repository into `dest`.
pub async fn shallow_clone(
    runner: &dyn ProcessRunner,
    repo: &str,
    branch: &str,
    dest: &Path,
    timeout: Duration,
) -> Result<()> {
    let out = runner
        .run(
            "git",
            &[
                "clone".to_string(),
                "--depth".to_string(),
                "1".to_string(),
                "--branch".to_string(),
                branch.to_string(),
                format!("https://github.com/{repo}.git"),
                dest.to_string_lossy().to_string(),
            ],
            None,
            None,
            timeout,
        )
        .await?;
    if !out.success() {
        bail!("git clone failed: {}", out.stderr.trim());
    }
    Ok(())
}

/// Paths changed in the working tree, from `git status --porcelain`.
pub async fn changed_files(
    runner: &dyn ProcessRunner,
    workdir: &Path,
    timeout: Duration,
) -> Result<Vec<String>> {
    let out = runner
        .run(
            "git",
            &["status".to_string(), "--porcelain".to_string()],
            Some(workdir),
            None,
            timeout,
        )
        .await?;
    if !out.success() {
        bail!("git status failed: {}", out.stderr.trim());
    }
    Ok(out
        .stdout
        .lines()
        .filter_map(|line| line.get(3..).map(str::to_string))
        .collect())
}

/// Commit the working tree on a fresh branch, push it, and open a PR.
pub async fn commit_and_open_pr(
    runner: &dyn ProcessRunner,
    gh: &GhClient,
    workdir: &Path,
    branch: &str,
    base: &str,
    title: &str,
    body: &str,
    timeout: Duration,
) -> Result<String> {
    for args in [
        vec!["checkout".to_string(), "-b".to_string(), branch.to_string()],
        vec!["add".to_string(), "-A".to_string()],
        vec![
            "commit".to_string(),
            "-m".to_string(),
            title.to_string(),
        ],
        vec![
            "push".to_string(),
            "origin".to_string(),
            branch.to_string(),
        ],
    ] {
        let out = runner.run("git", &args, Some(workdir), None, timeout).await?;
        if !out.success() {
            bail!("git {} failed: {}", args[0], out.stderr.trim());
        }
    }

    gh.create_pr(title, body, branch, base).await
}

/// Remove a scratch directory, tolerating its absence.
pub fn cleanup(scratch: &Path) {
    match std::fs::remove_dir_all(scratch) {
        Ok(()) => debug!("Removed scratch dir {}", scratch.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove scratch dir {}: {e}", scratch.display()),
    }
}
