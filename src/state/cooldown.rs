//! Cooldown and escalation tracking.
//!
//! Per (repository, error-signature) attempt history, persisted as shared
//! JSON. Decides whether a remediation run may proceed, must silently
//! skip (attempted too recently), or must escalate to a human (too many
//! failed attempts). Loop prevention, not fix correctness, is the point.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::lock::FileLock;
use crate::config::RemedyConfig;

/// Status of a tracked (repo, signature) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Attempted, not yet fixed
    Pending,
    /// A remediation attempt succeeded
    Fixed,
    /// Handed to a human; terminal until externally cleared
    Escalated,
}

/// One attempt-history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownEntry {
    pub repo: String,
    pub error_signature: String,
    pub attempts: u32,
    pub last_attempt: DateTime<Utc>,
    pub status: EntryStatus,
}

/// Outcome of an attempt, for recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Fixed,
    Failed,
    Escalated,
}

/// Decision for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// No recent history; go ahead
    Proceed,
    /// Attempted within the cooldown window; silently abort this run
    Skip,
    /// Attempt budget exhausted; open an escalation issue instead
    Escalate,
}

/// Repository-pattern wrapper around the shared cooldown file.
pub struct CooldownTracker {
    path: PathBuf,
    lock_timeout: Duration,
    cooldown: ChronoDuration,
    max_attempts: u32,
    stale_after: ChronoDuration,
}

impl CooldownTracker {
    /// Create a tracker bound to the configured state file.
    #[must_use]
    pub fn new(config: &RemedyConfig) -> Self {
        Self {
            path: config.cooldown_path(),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
            cooldown: ChronoDuration::hours(config.cooldown_hours),
            max_attempts: config.max_attempts_before_escalation,
            stale_after: ChronoDuration::days(config.stale_after_days),
        }
    }

    /// Decide whether remediation may proceed for this (repo, signature).
    ///
    /// - no entry: proceed
    /// - attempted within the cooldown window: skip (entry untouched)
    /// - cooldown expired with the attempt budget spent: escalate;
    ///   attempts never reset automatically, so escalation repeats until
    ///   a human clears the entry or the signature changes
    /// - otherwise: proceed
    pub fn check(&self, repo: &str, sig: &str) -> Result<CooldownDecision> {
        let _lock = FileLock::acquire(&self.path, self.lock_timeout)?;
        let entries = self.load_pruned()?;

        let Some(entry) = entries
            .iter()
            .find(|e| e.repo == repo && e.error_signature == sig)
        else {
            return Ok(CooldownDecision::Proceed);
        };

        if Utc::now() - entry.last_attempt < self.cooldown {
            debug!(
                "Cooldown active for {repo} / {sig} ({} attempts)",
                entry.attempts
            );
            return Ok(CooldownDecision::Skip);
        }

        if entry.attempts >= self.max_attempts {
            info!(
                "Attempt budget spent for {repo} / {sig} ({} attempts), escalating",
                entry.attempts
            );
            return Ok(CooldownDecision::Escalate);
        }

        Ok(CooldownDecision::Proceed)
    }

    /// Record an attempt: increments the counter, stamps the time, and
    /// updates the status (`fixed` only on success).
    pub fn record_attempt(&self, repo: &str, sig: &str, outcome: AttemptOutcome) -> Result<()> {
        let _lock = FileLock::acquire(&self.path, self.lock_timeout)?;
        let mut entries = self.load_pruned()?;

        let status = match outcome {
            AttemptOutcome::Fixed => EntryStatus::Fixed,
            AttemptOutcome::Failed => EntryStatus::Pending,
            AttemptOutcome::Escalated => EntryStatus::Escalated,
        };

        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.repo == repo && e.error_signature == sig)
        {
            entry.attempts += 1;
            entry.last_attempt = Utc::now();
            entry.status = status;
        } else {
            entries.push(CooldownEntry {
                repo: repo.to_string(),
                error_signature: sig.to_string(),
                attempts: 1,
                last_attempt: Utc::now(),
                status,
            });
        }

        self.save(&entries)
    }

    /// Load entries, lazily dropping any with no attempt in the stale
    /// window to bound file growth.
    fn load_pruned(&self) -> Result<Vec<CooldownEntry>> {
        let mut entries = self.load()?;
        let cutoff = Utc::now() - self.stale_after;
        let before = entries.len();
        entries.retain(|e| e.last_attempt >= cutoff);
        if entries.len() < before {
            debug!("Pruned {} stale cooldown entries", before - entries.len());
            self.save(&entries)?;
        }
        Ok(entries)
    }

    fn load(&self) -> Result<Vec<CooldownEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }

    fn save(&self, entries: &[CooldownEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pretty = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, pretty)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_in(dir: &std::path::Path) -> CooldownTracker {
        let config = RemedyConfig {
            state_dir: dir.to_path_buf(),
            ..RemedyConfig::default()
        };
        CooldownTracker::new(&config)
    }

    const SIG: &str = "CS0101: duplicate definition of 'Order'";

    #[test]
    fn test_no_entry_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        assert_eq!(
            tracker.check("acme/widgets", SIG).unwrap(),
            CooldownDecision::Proceed
        );
    }

    #[test]
    fn test_second_check_within_window_skips() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());

        tracker
            .record_attempt("acme/widgets", SIG, AttemptOutcome::Failed)
            .unwrap();
        assert_eq!(
            tracker.check("acme/widgets", SIG).unwrap(),
            CooldownDecision::Skip
        );
        // A different signature is unaffected
        assert_eq!(
            tracker.check("acme/widgets", "other signature text").unwrap(),
            CooldownDecision::Proceed
        );
    }

    #[test]
    fn test_escalates_after_attempt_budget_with_expired_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());

        tracker
            .record_attempt("acme/widgets", SIG, AttemptOutcome::Failed)
            .unwrap();
        tracker
            .record_attempt("acme/widgets", SIG, AttemptOutcome::Failed)
            .unwrap();

        // Rewind last_attempt past the cooldown window
        let mut entries = tracker.load().unwrap();
        entries[0].last_attempt = Utc::now() - ChronoDuration::hours(25);
        tracker.save(&entries).unwrap();

        assert_eq!(
            tracker.check("acme/widgets", SIG).unwrap(),
            CooldownDecision::Escalate
        );

        // Recording the escalation does not reset attempts; after another
        // expired window the decision is still escalate, never proceed
        tracker
            .record_attempt("acme/widgets", SIG, AttemptOutcome::Escalated)
            .unwrap();
        let mut entries = tracker.load().unwrap();
        entries[0].last_attempt = Utc::now() - ChronoDuration::hours(25);
        tracker.save(&entries).unwrap();
        assert_eq!(
            tracker.check("acme/widgets", SIG).unwrap(),
            CooldownDecision::Escalate
        );
        assert_eq!(tracker.load().unwrap()[0].status, EntryStatus::Escalated);
    }

    #[test]
    fn test_fixed_status_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker
            .record_attempt("acme/widgets", SIG, AttemptOutcome::Fixed)
            .unwrap();
        let entries = tracker.load().unwrap();
        assert_eq!(entries[0].status, EntryStatus::Fixed);
        assert_eq!(entries[0].attempts, 1);
    }

    #[test]
    fn test_stale_entries_pruned_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());

        tracker
            .record_attempt("acme/widgets", SIG, AttemptOutcome::Failed)
            .unwrap();
        let mut entries = tracker.load().unwrap();
        entries[0].last_attempt = Utc::now() - ChronoDuration::days(8);
        tracker.save(&entries).unwrap();

        assert_eq!(
            tracker.check("acme/widgets", SIG).unwrap(),
            CooldownDecision::Proceed
        );
        assert!(tracker.load().unwrap().is_empty());
    }
}
