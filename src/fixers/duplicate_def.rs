//! Duplicate-definition remover.
//!
//! Handles "already contains a definition for 'X'" errors: finds which
//! sibling file textually re-defines X and splices that block out.
//! Refuses to remove more than half of a file.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::blocks::{self, Block};
use super::{ContentSource, Fixer, FixerOutcome};
use crate::types::{FailedJob, Fix};

static DUP_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"already contains a definition for '(?P<name>[^']+)'").unwrap());

/// Share of a file the remover may delete before refusing.
const MAX_REMOVAL_RATIO: f64 = 0.5;

pub struct DuplicateDefinitionFixer;

#[async_trait]
impl Fixer for DuplicateDefinitionFixer {
    fn name(&self) -> &'static str {
        "duplicate-definition"
    }

    fn can_handle(&self, jobs: &[FailedJob]) -> bool {
        jobs.iter()
            .flat_map(|j| &j.annotations)
            .any(|a| DUP_DEF.is_match(&a.message))
    }

    async fn apply(
        &self,
        jobs: &[FailedJob],
        source: &dyn ContentSource,
    ) -> Result<Option<FixerOutcome>> {
        let mut fixes = Vec::new();
        let mut notes = Vec::new();
        let mut handled: Vec<String> = Vec::new();

        for annotation in jobs.iter().flat_map(|j| &j.annotations) {
            let Some(cap) = DUP_DEF.captures(&annotation.message) else {
                continue;
            };
            let name = cap["name"].to_string();
            if handled.contains(&name) {
                continue;
            }
            handled.push(name.clone());

            match remove_duplicate(&name, &annotation.path, source).await? {
                Some((fix, note)) => {
                    fixes.push(fix);
                    notes.push(note);
                }
                None => debug!("No safe removal found for duplicate '{name}'"),
            }
        }

        if fixes.is_empty() {
            return Ok(None);
        }
        Ok(Some(FixerOutcome {
            fixes,
            explanation: notes.join("; "),
        }))
    }
}

/// Locate and splice out the duplicated definition of `name`.
///
/// Candidates are the siblings of the annotated file (same directory,
/// same extension). When a standalone `X.<ext>` exists it is treated as
/// the canonical definition and the block is removed from another
/// candidate; otherwise the later of two defining files loses its copy.
async fn remove_duplicate(
    name: &str,
    annotated_path: &str,
    source: &dyn ContentSource,
) -> Result<Option<(Fix, String)>> {
    let (dir, ext) = split_dir_ext(annotated_path);
    let standalone_name = format!("{name}.{ext}");

    let mut defining: Vec<(String, String, Block)> = Vec::new();
    for entry in source.list_dir(&dir).await? {
        if !entry.ends_with(&format!(".{ext}")) {
            continue;
        }
        let path = join(&dir, &entry);
        let Some(content) = source.fetch_file(&path).await? else {
            continue;
        };
        if let Some(block) = blocks::find_definition(&content, name) {
            defining.push((path, content, block));
        }
    }

    let has_standalone = defining
        .iter()
        .any(|(p, _, _)| file_name(p) == standalone_name);

    let victim = if has_standalone {
        defining
            .iter()
            .find(|(p, _, _)| file_name(p) != standalone_name)
    } else if defining.len() >= 2 {
        // Prefer removing at the site the compiler flagged
        defining
            .iter()
            .find(|(p, _, _)| p == annotated_path)
            .or_else(|| defining.get(1))
    } else {
        None
    };

    let Some((path, content, block)) = victim else {
        return Ok(None);
    };

    let total_lines = content.lines().count().max(1);
    #[allow(clippy::cast_precision_loss)]
    let ratio = block.len() as f64 / total_lines as f64;
    if ratio > MAX_REMOVAL_RATIO {
        warn!(
            "Refusing to remove {} of {} lines from {path}",
            block.len(),
            total_lines
        );
        return Ok(None);
    }

    let new_content = blocks::remove_block(content, block);
    let note = format!("Removed duplicate {} from {path}", block.kind);
    Ok(Some((Fix::full(path.clone(), new_content), note)))
}

fn split_dir_ext(path: &str) -> (String, String) {
    let dir = path.rsplit_once('/').map_or("", |(d, _)| d).to_string();
    let ext = path.rsplit_once('.').map_or("cs", |(_, e)| e).to_string();
    (dir, ext)
}

fn join(dir: &str, entry: &str) -> String {
    if dir.is_empty() {
        entry.to_string()
    } else {
        format!("{dir}/{entry}")
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
