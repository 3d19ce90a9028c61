//! Confidence-weighted pattern store.
//!
//! An append-only knowledge base of (error-signature -> fix) mappings
//! learned from successful AI fixes, persisted as shared JSON. Patterns
//! gain confidence when their fix applies cleanly and lose it when it
//! fails; only sufficiently-confident patterns are eligible to match.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::lock::FileLock;
use crate::config::RemedyConfig;
use crate::signature;
use crate::types::FailedJob;

/// A learned (signature -> fix) mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    /// Unique time-based ID
    pub id: String,
    /// Error category (build, lint, deps, ...)
    pub category: String,
    /// Matching key: a truncated error-message slice
    pub signature: String,
    /// Human-readable fix summary used to enrich AI prompts
    pub fix: String,
    /// Shape of the original fix (content or replacements)
    pub fix_type: String,
    /// Repositories this signature has been seen in
    pub repos_seen: Vec<String>,
    /// Times this pattern matched
    pub occurrences: u64,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

/// On-disk store shape.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    patterns: Vec<Pattern>,
}

fn default_version() -> u32 {
    1
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            last_updated: None,
            patterns: Vec::new(),
        }
    }
}

/// Repository-pattern wrapper around the shared pattern file.
pub struct PatternStore {
    path: PathBuf,
    lock_timeout: Duration,
    match_threshold: f64,
    reward: f64,
    penalty: f64,
    min_signature_len: usize,
}

impl PatternStore {
    /// Create a store bound to the configured state file.
    #[must_use]
    pub fn new(config: &RemedyConfig) -> Self {
        Self {
            path: config.pattern_store_path(),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
            match_threshold: config.pattern_match_threshold,
            reward: config.confidence_reward,
            penalty: config.confidence_penalty,
            min_signature_len: config.min_signature_len,
        }
    }

    /// Scan all annotation and log text for a known signature.
    ///
    /// First-match-wins over the stored order; only patterns at or above
    /// the confidence threshold are considered.
    pub fn find_match(&self, jobs: &[FailedJob]) -> Result<Option<Pattern>> {
        let _lock = FileLock::acquire(&self.path, self.lock_timeout)?;
        let store = self.load()?;

        for pattern in &store.patterns {
            if pattern.confidence < self.match_threshold {
                continue;
            }
            if jobs.iter().any(|job| job.contains(&pattern.signature)) {
                debug!(
                    "Pattern {} matched (confidence {:.2})",
                    pattern.id, pattern.confidence
                );
                return Ok(Some(pattern.clone()));
            }
        }
        Ok(None)
    }

    /// Record the outcome of applying a pattern's fix.
    ///
    /// Success raises confidence by the reward (capped at 1.0); failure
    /// lowers it by the penalty (floored at 0.0). The repo is
    /// dedup-appended and occurrences bumped either way.
    pub fn record_hit(&self, id: &str, repo: &str, success: bool) -> Result<()> {
        self.mutate(|store| {
            if let Some(pattern) = store.patterns.iter_mut().find(|p| p.id == id) {
                pattern.occurrences += 1;
                if !pattern.repos_seen.iter().any(|r| r == repo) {
                    pattern.repos_seen.push(repo.to_string());
                }
                pattern.confidence = if success {
                    (pattern.confidence + self.reward).min(1.0)
                } else {
                    (pattern.confidence - self.penalty).max(0.0)
                };
            }
        })
    }

    /// Add a newly-learned pattern.
    ///
    /// Rejects signatures that are too short or known-useless generic
    /// messages, and skips signatures already present. Returns whether a
    /// pattern was actually added.
    pub fn add_new(
        &self,
        sig: &str,
        fix_summary: &str,
        fix_type: &str,
        category: &str,
        repo: &str,
    ) -> Result<bool> {
        if !signature::is_storable(sig, self.min_signature_len) {
            debug!("Signature rejected as unstorable: {sig}");
            return Ok(false);
        }

        self.mutate(|store| {
            if store.patterns.iter().any(|p| p.signature == sig) {
                return false;
            }
            let pattern = Pattern {
                id: format!("pat-{}", Utc::now().timestamp_millis()),
                category: category.to_string(),
                signature: sig.to_string(),
                fix: fix_summary.to_string(),
                fix_type: fix_type.to_string(),
                repos_seen: vec![repo.to_string()],
                occurrences: 1,
                confidence: 0.5,
            };
            info!("Learned new pattern {} for signature: {sig}", pattern.id);
            store.patterns.push(pattern);
            true
        })
    }

    /// Read-modify-write under the file lock; last writer wins within the
    /// lock window.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreFile) -> T) -> Result<T> {
        let _lock = FileLock::acquire(&self.path, self.lock_timeout)?;
        let mut store = self.load()?;
        let out = f(&mut store);
        store.last_updated = Some(Utc::now());
        self.save(&store)?;
        Ok(out)
    }

    fn load(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    fn save(&self, store: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pretty = serde_json::to_string_pretty(store)?;
        std::fs::write(&self.path, pretty)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Annotation;

    fn test_store(dir: &std::path::Path) -> PatternStore {
        let config = RemedyConfig {
            state_dir: dir.to_path_buf(),
            ..RemedyConfig::default()
        };
        PatternStore::new(&config)
    }

    fn job_with_message(message: &str) -> FailedJob {
        FailedJob {
            id: 1,
            name: "build".into(),
            annotations: vec![Annotation {
                path: "src/A.cs".into(),
                start_line: 1,
                end_line: 1,
                severity: "failure".into(),
                message: message.into(),
            }],
            log_text: String::new(),
        }
    }

    #[test]
    fn test_add_and_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        let sig = "CS0101: duplicate definition of 'Order'";
        assert!(store
            .add_new(sig, "remove duplicate class", "content", "build", "acme/widgets")
            .unwrap());

        // Fresh patterns start below the match threshold
        let jobs = vec![job_with_message(sig)];
        assert!(store.find_match(&jobs).unwrap().is_none());
    }

    #[test]
    fn test_confidence_delta_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let sig = "CS0101: duplicate definition of 'Order'";
        store
            .add_new(sig, "fix", "content", "build", "acme/widgets")
            .unwrap();

        let id = {
            let jobs = vec![job_with_message(sig)];
            // Raise confidence to 1.0 and verify the cap holds
            let loaded = store.load().unwrap();
            let id = loaded.patterns[0].id.clone();
            for _ in 0..20 {
                store.record_hit(&id, "acme/widgets", true).unwrap();
            }
            let loaded = store.load().unwrap();
            assert!((loaded.patterns[0].confidence - 1.0).abs() < f64::EPSILON);

            // Now it is eligible to match
            assert!(store.find_match(&jobs).unwrap().is_some());
            id
        };

        // Drive it to the floor
        for _ in 0..20 {
            store.record_hit(&id, "acme/widgets", false).unwrap();
        }
        let loaded = store.load().unwrap();
        assert!(loaded.patterns[0].confidence.abs() < f64::EPSILON);
        assert!(loaded.patterns[0].confidence >= 0.0);
    }

    #[test]
    fn test_success_strictly_increases_until_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        store
            .add_new(
                "E1234: some long signature text",
                "fix",
                "content",
                "build",
                "acme/widgets",
            )
            .unwrap();
        let id = store.load().unwrap().patterns[0].id.clone();

        let before = store.load().unwrap().patterns[0].confidence;
        store.record_hit(&id, "acme/widgets", true).unwrap();
        let after = store.load().unwrap().patterns[0].confidence;
        assert!(after > before);

        store.record_hit(&id, "acme/widgets", false).unwrap();
        let dropped = store.load().unwrap().patterns[0].confidence;
        assert!(dropped < after);
    }

    #[test]
    fn test_generic_and_short_signatures_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());

        assert!(!store
            .add_new(
                "Process completed with exit code 1.",
                "fix",
                "content",
                "build",
                "acme/widgets"
            )
            .unwrap());
        assert!(!store
            .add_new("short", "fix", "content", "build", "acme/widgets")
            .unwrap());
        assert_eq!(store.load().unwrap().patterns.len(), 0);
    }

    #[test]
    fn test_repos_seen_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        store
            .add_new(
                "E1234: some long signature text",
                "fix",
                "content",
                "build",
                "acme/widgets",
            )
            .unwrap();
        let id = store.load().unwrap().patterns[0].id.clone();

        store.record_hit(&id, "acme/widgets", true).unwrap();
        store.record_hit(&id, "acme/api", true).unwrap();
        store.record_hit(&id, "acme/api", true).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.patterns[0].repos_seen, vec!["acme/widgets", "acme/api"]);
        assert_eq!(loaded.patterns[0].occurrences, 4);
    }
}
