//! AI fallback chain.
//!
//! Ordering: a pattern-store hint enriches the prompt (it does not
//! replace the AI call), then the primary local-CLI assistant, then the
//! secondary HTTP assistant only when the primary yields zero fixes or is
//! unavailable. Returned fixes pass through the safety filter before
//! anything touches the repository.

pub mod parse;
pub mod primary;
pub mod prompt;
pub mod safety;
pub mod secondary;

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::config::RemedyConfig;
use crate::fixers::ContentSource;
use crate::process::ProcessRunner;
use crate::state::patterns::Pattern;
use crate::types::{FailedJob, ResolvedFix};

/// Result of running the chain.
#[derive(Debug, Default)]
pub struct ChainResult {
    pub fixes: Vec<ResolvedFix>,
    pub explanation: String,
    /// Which assistant produced the accepted fixes
    pub assistant: Option<&'static str>,
}

/// Run the fallback chain for the given failed jobs.
pub async fn run_chain(
    config: &RemedyConfig,
    repo: &str,
    jobs: &[FailedJob],
    hint: Option<&Pattern>,
    source: &dyn ContentSource,
    runner: &dyn ProcessRunner,
) -> Result<ChainResult> {
    let files = prompt::gather_files(jobs, source, config.max_prompt_file_bytes).await;
    let prompt_text = prompt::build(repo, jobs, &files, hint, config.max_prompt_log_bytes);

    // Snapshots for safety validation carry the full content even when
    // only a window was sent to the assistant.
    let mut snapshots: HashMap<String, safety::FileSnapshot> = HashMap::new();
    for file in &files {
        let full = if file.partial {
            source
                .fetch_file(&file.path)
                .await?
                .unwrap_or_else(|| file.sent_content.clone())
        } else {
            file.sent_content.clone()
        };
        snapshots.insert(
            file.path.clone(),
            safety::FileSnapshot {
                content: full,
                partial_context: file.partial,
            },
        );
    }

    let timeout = Duration::from_secs(config.process_timeout_secs);

    let primary = primary::PrimaryAssistant::new(runner, config.primary_command.clone(), timeout);
    if let Some(response) = primary.complete(&prompt_text).await? {
        if !response.fixes.is_empty() {
            let fixes = safety::validate(response.fixes, &snapshots, config.min_content_ratio);
            if !fixes.is_empty() {
                info!("Primary assistant produced {} validated fix(es)", fixes.len());
                return Ok(ChainResult {
                    fixes,
                    explanation: response.explanation,
                    assistant: Some("primary"),
                });
            }
        }
    }

    let secondary = secondary::SecondaryAssistant::new(
        &config.secondary_url,
        &config.secondary_model,
        &config.secondary_key_env,
        timeout,
    )?;
    if let Some(response) = secondary.complete(&prompt_text).await? {
        if !response.fixes.is_empty() {
            let fixes = safety::validate(response.fixes, &snapshots, config.min_content_ratio);
            if !fixes.is_empty() {
                info!(
                    "Secondary assistant produced {} validated fix(es)",
                    fixes.len()
                );
                return Ok(ChainResult {
                    fixes,
                    explanation: response.explanation,
                    assistant: Some("secondary"),
                });
            }
        }
    }

    info!("No AI fix available");
    Ok(ChainResult::default())
}
