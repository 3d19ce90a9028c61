//! Engine configuration.
//!
//! Every empirically-chosen constant lives here rather than inline in the
//! components that use it: confidence deltas, the pattern match threshold,
//! cooldown windows, prompt size caps. Values can be overridden from an
//! optional JSON config file; missing fields fall back to the defaults.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for a remediation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemedyConfig {
    /// Directory holding the shared pattern/cooldown state files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Minimum confidence for a stored pattern to be eligible to match
    #[serde(default = "default_match_threshold")]
    pub pattern_match_threshold: f64,
    /// Confidence delta applied on a successful pattern application
    #[serde(default = "default_confidence_reward")]
    pub confidence_reward: f64,
    /// Confidence delta applied on a failed pattern application
    #[serde(default = "default_confidence_penalty")]
    pub confidence_penalty: f64,
    /// Minimum signature length accepted into the pattern store
    #[serde(default = "default_min_signature_len")]
    pub min_signature_len: usize,
    /// Hours to wait before reattempting the same (repo, signature)
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
    /// Attempts before the tracker escalates instead of proceeding
    #[serde(default = "default_max_attempts")]
    pub max_attempts_before_escalation: u32,
    /// Days of inactivity after which cooldown entries are pruned
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,
    /// Log lines kept per failed job
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    /// Total bytes of file content included in an AI prompt
    #[serde(default = "default_max_prompt_file_bytes")]
    pub max_prompt_file_bytes: usize,
    /// Bytes of raw log included per annotation-less job
    #[serde(default = "default_max_prompt_log_bytes")]
    pub max_prompt_log_bytes: usize,
    /// Minimum ratio of returned content length to original file length
    /// before a full-content AI fix is trusted
    #[serde(default = "default_min_content_ratio")]
    pub min_content_ratio: f64,
    /// Maximum share of a file the duplicate remover may delete
    #[serde(default = "default_max_removal_ratio")]
    pub max_removal_ratio: f64,
    /// Seconds to spin-wait for the state file lock before presuming it stale
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Seconds allowed per hosting-API call
    #[serde(default = "default_gh_timeout_secs")]
    pub gh_timeout_secs: u64,
    /// Bounded retries for rate-limited hosting-API calls
    #[serde(default = "default_gh_max_retries")]
    pub gh_max_retries: u32,
    /// Seconds allowed per external process (clone, install, format, AI CLI)
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
    /// Command line for the primary (local CLI) assistant
    #[serde(default = "default_primary_command")]
    pub primary_command: Vec<String>,
    /// Endpoint for the secondary (HTTP) assistant
    #[serde(default = "default_secondary_url")]
    pub secondary_url: String,
    /// Model requested from the secondary assistant
    #[serde(default = "default_secondary_model")]
    pub secondary_model: String,
    /// Environment variable holding the secondary assistant's API key
    #[serde(default = "default_secondary_key_env")]
    pub secondary_key_env: String,
    /// Pattern confidence required before auto-merge is requested
    #[serde(default = "default_auto_merge_confidence")]
    pub auto_merge_min_confidence: f64,
    /// Maximum files in a fix set eligible for auto-merge
    #[serde(default = "default_auto_merge_max_files")]
    pub auto_merge_max_files: usize,
    /// Maximum changed lines in a fix set eligible for auto-merge
    #[serde(default = "default_auto_merge_max_lines")]
    pub auto_merge_max_lines: usize,
    /// Branch prefix for remediation branches (also the loop-guard test)
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".mend")
}
fn default_match_threshold() -> f64 {
    0.8
}
fn default_confidence_reward() -> f64 {
    0.05
}
fn default_confidence_penalty() -> f64 {
    0.1
}
fn default_min_signature_len() -> usize {
    10
}
fn default_cooldown_hours() -> i64 {
    24
}
fn default_max_attempts() -> u32 {
    2
}
fn default_stale_after_days() -> i64 {
    7
}
fn default_log_tail_lines() -> usize {
    400
}
fn default_max_prompt_file_bytes() -> usize {
    60 * 1024
}
fn default_max_prompt_log_bytes() -> usize {
    3 * 1024
}
fn default_min_content_ratio() -> f64 {
    0.3
}
fn default_max_removal_ratio() -> f64 {
    0.5
}
fn default_lock_timeout_secs() -> u64 {
    30
}
fn default_gh_timeout_secs() -> u64 {
    60
}
fn default_gh_max_retries() -> u32 {
    3
}
fn default_process_timeout_secs() -> u64 {
    300
}
fn default_primary_command() -> Vec<String> {
    vec!["claude".to_string(), "-p".to_string()]
}
fn default_secondary_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_secondary_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_secondary_key_env() -> String {
    "MEND_FALLBACK_API_KEY".to_string()
}
fn default_auto_merge_confidence() -> f64 {
    0.9
}
fn default_auto_merge_max_files() -> usize {
    3
}
fn default_auto_merge_max_lines() -> usize {
    200
}
fn default_branch_prefix() -> String {
    "mend/".to_string()
}

impl Default for RemedyConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserializes to defaults")
    }
}

impl RemedyConfig {
    /// Load from a JSON file, or return defaults when the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config {}", p.display()))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Path of the pattern store file.
    #[must_use]
    pub fn pattern_store_path(&self) -> PathBuf {
        self.state_dir.join("patterns.json")
    }

    /// Path of the cooldown tracker file.
    #[must_use]
    pub fn cooldown_path(&self) -> PathBuf {
        self.state_dir.join("cooldowns.json")
    }
}
