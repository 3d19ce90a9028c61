//! Atomic commit and PR publishing.
//!
//! An accepted fix set lands as one unit: one blob per file, one tree on
//! top of the branch's tree, one commit, one conditional ref update.
//! Either every file is in the published commit or the branch ref never
//! moves - there is no interim state with a subset of files patched.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::github::{pr_number_from_url, GhClient, TreeEntry};
use crate::types::ResolvedFix;

/// Label applied to AI-originated fix PRs.
const AI_FIX_LABEL: &str = "ai-fix";

/// Git data operations needed for one atomic publish.
#[async_trait]
pub trait GitOps: Send + Sync {
    async fn ref_sha(&self, branch: &str) -> Result<Option<String>>;
    async fn commit_tree_sha(&self, commit_sha: &str) -> Result<String>;
    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()>;
    async fn create_blob(&self, content: &str) -> Result<String>;
    async fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String>;
    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String>;
    async fn advance_ref(&self, branch: &str, sha: &str) -> Result<()>;
}

#[async_trait]
impl GitOps for GhClient {
    async fn ref_sha(&self, branch: &str) -> Result<Option<String>> {
        GhClient::ref_sha(self, branch).await
    }
    async fn commit_tree_sha(&self, commit_sha: &str) -> Result<String> {
        GhClient::commit_tree_sha(self, commit_sha).await
    }
    async fn create_branch(&self, branch: &str, sha: &str) -> Result<()> {
        GhClient::create_branch(self, branch, sha).await
    }
    async fn create_blob(&self, content: &str) -> Result<String> {
        GhClient::create_blob(self, content).await
    }
    async fn create_tree(&self, base_tree: &str, entries: &[TreeEntry]) -> Result<String> {
        GhClient::create_tree(self, base_tree, entries).await
    }
    async fn create_commit(&self, message: &str, tree: &str, parent: &str) -> Result<String> {
        GhClient::create_commit(self, message, tree, parent).await
    }
    async fn advance_ref(&self, branch: &str, sha: &str) -> Result<()> {
        GhClient::advance_ref(self, branch, sha).await
    }
}

/// A published remediation PR.
#[derive(Debug, Clone)]
pub struct PublishedPr {
    pub url: String,
    pub number: Option<u64>,
    pub branch: String,
}

/// Auto-merge eligibility gate.
#[must_use]
pub fn auto_merge_eligible(
    fixes: &[ResolvedFix],
    pattern_confidence: Option<f64>,
    max_files: usize,
    max_lines: usize,
    min_confidence: f64,
) -> bool {
    let Some(confidence) = pattern_confidence else {
        return false;
    };
    if confidence < min_confidence {
        return false;
    }
    if fixes.len() > max_files {
        return false;
    }
    let total_lines: usize = fixes.iter().map(|f| f.content.lines().count()).sum();
    total_lines <= max_lines
}

/// Create the remediation commit: blobs, tree, commit, conditional ref
/// advance. The fix branch is created at the base SHA first, so the only
/// observable states are "unchanged" and "all files committed".
pub async fn commit_fix_set(
    git: &dyn GitOps,
    base_branch: &str,
    fixes: &[ResolvedFix],
    message: &str,
    branch_prefix: &str,
    run_id: u64,
) -> Result<(String, String)> {
    let base_sha = git
        .ref_sha(base_branch)
        .await?
        .with_context(|| format!("Cannot resolve base branch '{base_branch}'"))?;
    let base_tree = git.commit_tree_sha(&base_sha).await?;

    let fix_branch = format!(
        "{branch_prefix}fix-{run_id}-{}",
        &Uuid::new_v4().simple().to_string()[..8]
    );
    git.create_branch(&fix_branch, &base_sha)
        .await
        .with_context(|| format!("Cannot create branch '{fix_branch}'"))?;

    let mut entries = Vec::with_capacity(fixes.len());
    for fix in fixes {
        let blob_sha = git.create_blob(&fix.content).await?;
        entries.push(TreeEntry {
            path: fix.path.clone(),
            blob_sha,
        });
    }

    let tree_sha = git.create_tree(&base_tree, &entries).await?;
    let commit_sha = git.create_commit(message, &tree_sha, &base_sha).await?;
    git.advance_ref(&fix_branch, &commit_sha).await?;

    info!(
        "Committed {} file(s) as {} on {}",
        fixes.len(),
        &commit_sha[..7.min(commit_sha.len())],
        fix_branch
    );
    Ok((fix_branch, commit_sha))
}

/// Publish a fix set: atomic commit, PR, label, optional auto-merge.
pub async fn publish(
    gh: &GhClient,
    base_branch: &str,
    fixes: &[ResolvedFix],
    title: &str,
    body: &str,
    branch_prefix: &str,
    run_id: u64,
    request_auto_merge: bool,
) -> Result<PublishedPr> {
    let (fix_branch, _commit) =
        commit_fix_set(gh, base_branch, fixes, title, branch_prefix, run_id).await?;

    let url = gh.create_pr(title, body, &fix_branch, base_branch).await?;
    let number = pr_number_from_url(&url);

    if let Err(e) = gh
        .ensure_label(AI_FIX_LABEL, "1D76DB", "Automated CI remediation")
        .await
    {
        warn!("Could not ensure label: {e}");
    }
    if let Some(n) = number {
        if let Err(e) = gh.label_pr(n, &[AI_FIX_LABEL]).await {
            warn!("Could not label PR #{n}: {e}");
        }
        if request_auto_merge {
            if let Err(e) = gh.enable_auto_merge(n).await {
                warn!("Could not enable auto-merge for PR #{n}: {e}");
            }
        }
    }

    Ok(PublishedPr {
        url,
        number,
        branch: fix_branch,
    })
}
