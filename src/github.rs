//! GitHub operations via the `gh` CLI.
//!
//! Every hosting-platform interaction goes through this client:
//! - Failed job/annotation/log retrieval for a workflow run
//! - File and tree reads at a ref
//! - Git data writes (blobs, trees, commits, refs) for atomic publishing
//! - PRs, issues, labels, and failed-job reruns
//!
//! Calls carry an explicit timeout and apply exponential backoff with a
//! bounded retry count when the API reports rate limiting.

use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A job record from the run's job list.
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<String>,
}

/// Branch and head commit of a workflow run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunInfo {
    pub branch: String,
    pub sha: String,
}

/// One entry for a new git tree.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: String,
    pub blob_sha: String,
}

/// GitHub client for a single repository, backed by the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhClient {
    /// Repository full name (owner/name)
    pub repo: String,
    timeout: Duration,
    max_retries: u32,
}

impl GhClient {
    /// Create a new client.
    #[must_use]
    pub fn new(repo: &str, timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            repo: repo.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }

    /// Run `gh` with the given arguments, retrying on rate limits.
    async fn run(&self, args: &[&str]) -> Result<String> {
        self.run_with_stdin(args, None).await
    }

    /// Run `gh`, optionally feeding a request body on stdin.
    async fn run_with_stdin(&self, args: &[&str], stdin: Option<&str>) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            let result = self.spawn_once(args, stdin).await?;
            match result {
                GhOutput::Ok(stdout) => return Ok(stdout),
                GhOutput::Err(stderr) => {
                    if is_rate_limited(&stderr) && attempt < self.max_retries {
                        let delay = Duration::from_secs(2u64.pow(attempt + 1));
                        warn!(
                            "gh rate limited (attempt {}), backing off {}s",
                            attempt + 1,
                            delay.as_secs()
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    bail!("gh {} failed: {stderr}", args.first().unwrap_or(&""));
                }
            }
        }
    }

    async fn spawn_once(&self, args: &[&str], stdin: Option<&str>) -> Result<GhOutput> {
        debug!("gh {}", args.join(" "));

        let mut cmd = Command::new("gh");
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("Failed to spawn gh")?;

        if let Some(body) = stdin {
            let mut pipe = child.stdin.take().context("gh stdin unavailable")?;
            pipe.write_all(body.as_bytes())
                .await
                .context("Failed to write gh stdin")?;
            drop(pipe);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .context("gh call timed out")?
            .context("Failed to collect gh output")?;

        if output.status.success() {
            Ok(GhOutput::Ok(
                String::from_utf8_lossy(&output.stdout).to_string(),
            ))
        } else {
            Ok(GhOutput::Err(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
    }

    // --- Run / job reads ---------------------------------------------------

    /// Fetch branch and head SHA for a workflow run.
    pub async fn run_info(&self, run_id: u64) -> Result<RunInfo> {
        let out = self
            .run(&[
                "api",
                &format!("repos/{}/actions/runs/{run_id}", self.repo),
                "--jq",
                "{branch: .head_branch, sha: .head_sha}",
            ])
            .await?;
        serde_json::from_str(&out).context("Failed to parse run info")
    }

    /// List jobs for a run that concluded in failure.
    pub async fn list_failed_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>> {
        let out = self
            .run(&[
                "api",
                &format!("repos/{}/actions/runs/{run_id}/jobs", self.repo),
                "--paginate",
                "--jq",
                ".jobs[] | {id: .id, name: .name, conclusion: .conclusion}",
            ])
            .await?;

        // JSONL output, one job per line
        let mut jobs = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(job) = serde_json::from_str::<JobRecord>(line) {
                if job.conclusion.as_deref() == Some("failure") {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    /// Fetch check-run annotations for a job. Returns the raw JSON value so
    /// the caller can detect a non-array permission denial.
    pub async fn annotations(&self, job_id: u64) -> Result<serde_json::Value> {
        let out = self
            .run(&[
                "api",
                &format!("repos/{}/check-runs/{job_id}/annotations", self.repo),
            ])
            .await;
        match out {
            Ok(raw) => Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)),
            Err(e) => {
                debug!("Annotations unavailable for job {job_id}: {e}");
                Ok(serde_json::Value::Null)
            }
        }
    }

    /// Fetch the raw log for a job. Missing logs yield an empty string.
    pub async fn job_log(&self, job_id: u64) -> Result<String> {
        match self
            .run(&[
                "api",
                &format!("repos/{}/actions/jobs/{job_id}/logs", self.repo),
            ])
            .await
        {
            Ok(log) => Ok(log),
            Err(e) => {
                debug!("Log unavailable for job {job_id}: {e}");
                Ok(String::new())
            }
        }
    }

    /// Re-run the failed jobs of a workflow run.
    pub async fn rerun_failed_jobs(&self, run_id: u64) -> Result<()> {
        self.run(&[
            "run",
            "rerun",
            &run_id.to_string(),
            "--repo",
            &self.repo,
            "--failed",
        ])
        .await?;
        info!("Triggered rerun of failed jobs for run {run_id}");
        Ok(())
    }

    // --- Content reads -----------------------------------------------------

    /// Fetch file content at a ref. Returns `None` when the path is absent.
    pub async fn file_content(&self, path: &str, git_ref: &str) -> Result<Option<String>> {
        let result = self
            .run(&[
                "api",
                &format!("repos/{}/contents/{path}?ref={git_ref}", self.repo),
                "-H",
                "Accept: application/vnd.github.raw",
            ])
            .await;
        match result {
            Ok(content) => Ok(Some(content)),
            Err(e) if is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List entry names of a directory at a ref.
    pub async fn list_dir(&self, path: &str, git_ref: &str) -> Result<Vec<String>> {
        let result = self
            .run(&[
                "api",
                &format!("repos/{}/contents/{path}?ref={git_ref}", self.repo),
                "--jq",
                ".[].name",
            ])
            .await;
        match result {
            Ok(out) => Ok(out.lines().map(str::to_string).collect()),
            Err(e) if is_not_found(&e.to_string()) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    // --- Git data writes ---------------------------------------------------

    /// SHA a branch ref points at, or `None` when the branch is absent.
    pub async fn ref_sha(&self, branch: &str) -> Result<Option<String>> {
        let result = self
            .run(&[
                "api",
                &format!("repos/{}/git/ref/heads/{branch}", self.repo),
                "--jq",
                ".object.sha",
            ])
            .await;
        match result {
            Ok(sha) => Ok(Some(sha.trim().to_string())),
            Err(e) if is_not_found(&e.to_string()) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Tree SHA of a commit.
    pub async fn commit_tree_sha(&self, commit_sha: &str) -> Result<String> {
        let out = self
            .run(&[
                "api",
                &format!("repos/{}/git/commits/{commit_sha}", self.repo),
                "--jq",
                ".tree.sha",
            ])
            .await?;
        Ok(out.trim().to_string())
    }

    /// Create a blob, returning its SHA.
    pub async fn create_blob(&self, content: &str) -> Result<String> {
        let body = serde_json::json!({ "content": content, "encoding": "utf-8" });
        let out = self
            .run_with_stdin(
                &[
                    "api",
                    &format!("repos/{}/git/blobs", self.repo),
                    "--method",
                    "POST",
                    "--input",
                    "-",
                    "--jq",
                    ".sha",
                ],
                Some(&body.to_string()),
            )
            .await?;
        Ok(out.trim().to_string())
    }

    /// Create a tree on top of a base tree, returning its SHA.
    pub async fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String> {
        let tree: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "path": e.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": e.blob_sha,
                })
            })
            .collect();
        let body = serde_json::json!({ "base_tree": base_tree, "tree": tree });
        let out = self
            .run_with_stdin(
                &[
                    "api",
                    &format!("repos/{}/git/trees", self.repo),
                    "--method",
                    "POST",
                    "--input",
                    "-",
                    "--jq",
                    ".sha",
                ],
                Some(&body.to_string()),
            )
            .await?;
        Ok(out.trim().to_string())
    }

    /// Create a commit, returning its SHA.
    pub async fn create_commit(
        &self,
        message: &str,
        tree_sha: &str,
        parent_sha: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "message": message,
            "tree": tree_sha,
            "parents": [parent_sha],
        });
        let out = self
            .run_with_stdin(
                &[
                    "api",
                    &format!("repos/{}/git/commits", self.repo),
                    "--method",
                    "POST",
                    "--input",
                    "-",
                    "--jq",
                    ".sha",
                ],
                Some(&body.to_string()),
            )
            .await?;
        Ok(out.trim().to_string())
    }

    /// Create a branch ref at the given SHA.
    pub async fn create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        let body = serde_json::json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        self.run_with_stdin(
            &[
                "api",
                &format!("repos/{}/git/refs", self.repo),
                "--method",
                "POST",
                "--input",
                "-",
            ],
            Some(&body.to_string()),
        )
        .await?;
        Ok(())
    }

    /// Fast-forward a branch ref to a new commit. The update is conditional:
    /// the API rejects it if the branch moved since `sha`'s parent.
    pub async fn advance_ref(&self, branch: &str, sha: &str) -> Result<()> {
        let body = serde_json::json!({ "sha": sha, "force": false });
        self.run_with_stdin(
            &[
                "api",
                &format!("repos/{}/git/refs/heads/{branch}", self.repo),
                "--method",
                "PATCH",
                "--input",
                "-",
            ],
            Some(&body.to_string()),
        )
        .await?;
        Ok(())
    }

    // --- PRs, issues, labels -----------------------------------------------

    /// Open a pull request, returning its URL.
    pub async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String> {
        let out = self
            .run(&[
                "pr", "create", "--repo", &self.repo, "--title", title, "--body", body, "--head",
                head, "--base", base,
            ])
            .await?;
        let url = out.trim().to_string();
        info!(pr_url = %url, "Opened pull request");
        Ok(url)
    }

    /// Ensure a label exists (no-op if it already does).
    pub async fn ensure_label(&self, name: &str, color: &str, description: &str) -> Result<()> {
        self.run(&[
            "label",
            "create",
            name,
            "--repo",
            &self.repo,
            "--color",
            color,
            "--description",
            description,
            "--force",
        ])
        .await?;
        Ok(())
    }

    /// Add labels to a PR.
    pub async fn label_pr(&self, pr_number: u64, labels: &[&str]) -> Result<()> {
        let joined = labels.join(",");
        self.run(&[
            "pr",
            "edit",
            &pr_number.to_string(),
            "--repo",
            &self.repo,
            "--add-label",
            &joined,
        ])
        .await?;
        Ok(())
    }

    /// Request auto-merge-on-green for a PR.
    pub async fn enable_auto_merge(&self, pr_number: u64) -> Result<()> {
        self.run(&[
            "pr",
            "merge",
            &pr_number.to_string(),
            "--repo",
            &self.repo,
            "--auto",
            "--squash",
        ])
        .await?;
        info!("Requested auto-merge for PR #{pr_number}");
        Ok(())
    }

    /// Create an issue, returning its URL.
    pub async fn create_issue(&self, title: &str, body: &str, labels: &[&str]) -> Result<String> {
        let joined = labels.join(",");
        let out = self
            .run(&[
                "issue", "create", "--repo", &self.repo, "--title", title, "--body", body,
                "--label", &joined,
            ])
            .await?;
        let url = out.trim().to_string();
        info!(issue_url = %url, "Created issue");
        Ok(url)
    }
}

enum GhOutput {
    Ok(String),
    Err(String),
}

/// Detect rate-limit responses by status/marker text.
fn is_rate_limited(stderr: &str) -> bool {
    stderr.contains("HTTP 429")
        || stderr.contains("HTTP 403")
        || stderr.contains("rate limit")
        || stderr.contains("API rate limit exceeded")
}

fn is_not_found(message: &str) -> bool {
    message.contains("HTTP 404") || message.contains("Not Found")
}

/// Parse the PR number out of a PR URL.
#[must_use]
pub fn pr_number_from_url(url: &str) -> Option<u64> {
    url.rsplit('/').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited("HTTP 429 Too Many Requests"));
        assert!(is_rate_limited("gh: API rate limit exceeded for user"));
        assert!(!is_rate_limited("HTTP 404 Not Found"));
    }

    #[test]
    fn test_pr_number_from_url() {
        assert_eq!(
            pr_number_from_url("https://github.com/acme/widgets/pull/421"),
            Some(421)
        );
        assert_eq!(pr_number_from_url("not a url"), None);
    }

    #[test]
    fn test_failed_job_parse() {
        let line = r#"{"id": 77, "name": "build", "conclusion": "failure"}"#;
        let job: JobRecord = serde_json::from_str(line).unwrap();
        assert_eq!(job.id, 77);
        assert_eq!(job.conclusion.as_deref(), Some("failure"));
    }
}
