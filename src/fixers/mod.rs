//! Deterministic fixers.
//!
//! Each fixer recognizes one error class and produces a source patch
//! without any AI call. The orchestrator iterates the registry in a fixed
//! priority order; a fixer only runs when `can_handle` sees its error
//! class in the failed jobs.
//!
//! # Fixers
//! - duplicate_def: removes a duplicated type/member definition
//! - ambiguous_ref: removes the twin of an identical ambiguous definition
//! - format_rules: line-level formatting transforms + lint suppressions
//! - lockfile / formatter: shell-mediated passes that open their own PRs

pub mod ambiguous_ref;
pub mod blocks;
pub mod duplicate_def;
pub mod format_rules;
pub mod formatter;
pub mod lockfile;
pub mod shell;

use anyhow::Result;
use async_trait::async_trait;

use crate::github::GhClient;
use crate::types::{FailedJob, Fix};

/// Read-only view of repository content at a fixed ref.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch a file's content, `None` when absent.
    async fn fetch_file(&self, path: &str) -> Result<Option<String>>;
    /// List entry names of a directory.
    async fn list_dir(&self, path: &str) -> Result<Vec<String>>;
}

/// Content source backed by the hosting API at one ref.
pub struct RepoAtRef {
    gh: GhClient,
    git_ref: String,
}

impl RepoAtRef {
    #[must_use]
    pub fn new(gh: GhClient, git_ref: &str) -> Self {
        Self {
            gh,
            git_ref: git_ref.to_string(),
        }
    }
}

#[async_trait]
impl ContentSource for RepoAtRef {
    async fn fetch_file(&self, path: &str) -> Result<Option<String>> {
        self.gh.file_content(path, &self.git_ref).await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.gh.list_dir(path, &self.git_ref).await
    }
}

/// Result of a fixer that produced patches.
#[derive(Debug, Clone)]
pub struct FixerOutcome {
    pub fixes: Vec<Fix>,
    pub explanation: String,
}

/// A deterministic fix-producing routine for one error class.
#[async_trait]
pub trait Fixer: Send + Sync {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Whether this fixer's error class appears in the failed jobs.
    fn can_handle(&self, jobs: &[FailedJob]) -> bool;

    /// Produce patches for the recognized errors. Returns `None` when the
    /// error class was present but no safe patch could be derived.
    async fn apply(
        &self,
        jobs: &[FailedJob],
        source: &dyn ContentSource,
    ) -> Result<Option<FixerOutcome>>;
}

/// Registry of content fixers in priority order.
pub struct FixerRegistry {
    fixers: Vec<Box<dyn Fixer>>,
}

impl FixerRegistry {
    /// All content fixers, highest priority first.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fixers: vec![
                Box::new(duplicate_def::DuplicateDefinitionFixer),
                Box::new(ambiguous_ref::AmbiguousReferenceFixer),
                Box::new(format_rules::FormatRulesFixer),
            ],
        }
    }

    /// Run every applicable fixer, collecting outcomes in priority order.
    pub async fn apply_all(
        &self,
        jobs: &[FailedJob],
        source: &dyn ContentSource,
    ) -> Vec<FixerOutcome> {
        let mut outcomes = Vec::new();
        for fixer in &self.fixers {
            if !fixer.can_handle(jobs) {
                continue;
            }
            match fixer.apply(jobs, source).await {
                Ok(Some(outcome)) => {
                    tracing::info!(
                        "Fixer {} produced {} fix(es)",
                        fixer.name(),
                        outcome.fixes.len()
                    );
                    outcomes.push(outcome);
                }
                Ok(None) => {
                    tracing::debug!("Fixer {} declined", fixer.name());
                }
                Err(e) => {
                    tracing::warn!("Fixer {} failed: {e}", fixer.name());
                }
            }
        }
        outcomes
    }
}

impl Default for FixerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory content source for fixer tests.

    use super::ContentSource;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    /// Serves files from a path -> content map.
    #[derive(Default)]
    pub struct FakeRepo {
        files: BTreeMap<String, String>,
    }

    impl FakeRepo {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add(&mut self, path: &str, content: &str) -> &mut Self {
            self.files.insert(path.to_string(), content.to_string());
            self
        }
    }

    #[async_trait]
    impl ContentSource for FakeRepo {
        async fn fetch_file(&self, path: &str) -> Result<Option<String>> {
            Ok(self.files.get(path).cloned())
        }

        async fn list_dir(&self, path: &str) -> Result<Vec<String>> {
            let prefix = if path.is_empty() || path == "." {
                String::new()
            } else {
                format!("{path}/")
            };
            let mut names: Vec<String> = self
                .files
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string)
                .collect();
            names.dedup();
            Ok(names)
        }
    }
}
