//! Core types for the remediation engine.
//!
//! This module defines the transient data structures that flow between
//! components during a single invocation:
//! - Failed jobs and their structured annotations
//! - Fixes (full-content or anchored replacements)
//! - The final outcome of a run

use serde::{Deserialize, Serialize};

/// A structured annotation attached to a failed check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Repository-relative file path
    pub path: String,
    /// First affected line
    pub start_line: u64,
    /// Last affected line
    pub end_line: u64,
    /// Annotation level (failure, warning, notice)
    pub severity: String,
    /// Error message text
    pub message: String,
}

impl Annotation {
    /// Check if this annotation represents an error (as opposed to a
    /// warning or notice).
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == "failure" || self.severity == "error"
    }
}

/// A failed CI job with its annotations and trailing log slice.
///
/// Created fresh per invocation, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    /// Job ID (also the check-run ID for annotation lookup)
    pub id: u64,
    /// Job name within the workflow
    pub name: String,
    /// Structured annotations (fetched or synthesized from logs)
    pub annotations: Vec<Annotation>,
    /// Trailing slice of the job log
    pub log_text: String,
}

impl FailedJob {
    /// Check if any annotation or log line contains the given needle.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.annotations.iter().any(|a| a.message.contains(needle))
            || self.log_text.contains(needle)
    }

    /// Check if this job carries any error-level annotations.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.annotations.iter().any(Annotation::is_error)
    }
}

/// A single anchored text replacement within a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    /// Exact text to find
    pub search: String,
    /// Text to substitute
    pub replace: String,
}

/// A proposed patch to one file.
///
/// Exactly one of `content` / `replacements` is set: either the whole
/// file is rewritten, or a set of anchored edits is applied atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    /// Repository-relative file path
    pub path: String,
    /// Full replacement content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Anchored search/replace edits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacements: Option<Vec<Replacement>>,
}

impl Fix {
    /// Create a full-content fix.
    #[must_use]
    pub fn full(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Some(content.into()),
            replacements: None,
        }
    }

    /// Create an anchored replacement fix.
    #[must_use]
    pub fn anchored(path: impl Into<String>, replacements: Vec<Replacement>) -> Self {
        Self {
            path: path.into(),
            content: None,
            replacements: Some(replacements),
        }
    }

    /// Check that exactly one representation is present.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.content.is_some() != self.replacements.is_some()
    }
}

/// A fix resolved against the current file content, ready to commit.
#[derive(Debug, Clone)]
pub struct ResolvedFix {
    /// Repository-relative file path
    pub path: String,
    /// Final file content
    pub content: String,
}

/// Where an accepted fix set came from, for labeling and learning.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOrigin {
    /// Produced by a deterministic fixer
    Deterministic(&'static str),
    /// Produced by an AI assistant, optionally guided by a stored pattern
    Ai {
        /// ID of the pattern that enriched the prompt, if any
        pattern_id: Option<String>,
        /// Confidence of that pattern at match time
        pattern_confidence: Option<f64>,
    },
}

/// Terminal outcome of one invocation.
///
/// The engine always produces exactly one of these; silence is a bug.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// A corrective PR was opened
    PullRequest { url: String },
    /// Failed jobs were re-run (flaky infrastructure)
    Rerun,
    /// Escalated to a human-facing issue after repeated failures
    Escalated { issue_url: String },
    /// A manual-review issue was opened (no automated fix found)
    ManualIssue { issue_url: String },
    /// Silently skipped (cooldown window or remediation-branch loop guard)
    Skipped { reason: String },
}

impl RunOutcome {
    /// Short label for the final summary log line.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::PullRequest { .. } => "pr",
            Self::Rerun => "rerun",
            Self::Escalated { .. } => "escalated",
            Self::ManualIssue { .. } => "manual-issue",
            Self::Skipped { .. } => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_well_formed() {
        let full = Fix::full("src/A.cs", "content");
        assert!(full.is_well_formed());

        let anchored = Fix::anchored(
            "src/A.cs",
            vec![Replacement {
                search: "old".into(),
                replace: "new".into(),
            }],
        );
        assert!(anchored.is_well_formed());

        let neither = Fix {
            path: "src/A.cs".into(),
            content: None,
            replacements: None,
        };
        assert!(!neither.is_well_formed());
    }

    #[test]
    fn test_job_contains_scans_annotations_and_logs() {
        let job = FailedJob {
            id: 1,
            name: "build".into(),
            annotations: vec![Annotation {
                path: "src/A.cs".into(),
                start_line: 10,
                end_line: 10,
                severity: "failure".into(),
                message: "error CS0101: duplicate definition".into(),
            }],
            log_text: "restoring packages\nETIMEDOUT while fetching".into(),
        };

        assert!(job.contains("CS0101"));
        assert!(job.contains("ETIMEDOUT"));
        assert!(!job.contains("nonexistent"));
        assert!(job.has_errors());
    }
}
