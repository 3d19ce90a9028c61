//! Ambiguous-reference resolver.
//!
//! Handles "'X' is an ambiguous reference between 'A.X' and 'B.X'"
//! errors. When a standalone `X.<ext>` file holds one definition and the
//! other namespace carries a textually identical copy, the copy is
//! removed with the same boundary-matching primitive the duplicate
//! remover uses. Diverging definitions are left alone.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use super::blocks;
use super::{ContentSource, Fixer, FixerOutcome};
use crate::types::{FailedJob, Fix};

static AMBIGUOUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"'(?P<name>[^']+)' is an ambiguous reference between '(?P<first>[^']+)' and '(?P<second>[^']+)'",
    )
    .unwrap()
});

pub struct AmbiguousReferenceFixer;

#[async_trait]
impl Fixer for AmbiguousReferenceFixer {
    fn name(&self) -> &'static str {
        "ambiguous-reference"
    }

    fn can_handle(&self, jobs: &[FailedJob]) -> bool {
        jobs.iter()
            .flat_map(|j| &j.annotations)
            .any(|a| AMBIGUOUS.is_match(&a.message))
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
            let Some(cap) = AMBIGUOUS.captures(&annotation.message) else {
                continue;
            };
            let name = cap["name"].to_string();
            if handled.contains(&name) {
                continue;
            }
            handled.push(name.clone());

            let ext = annotation
                .path
                .rsplit_once('.')
                .map_or("cs", |(_, e)| e)
                .to_string();
            let namespaces = [cap["first"].to_string(), cap["second"].to_string()];

            if let Some((fix, note)) =
                resolve_ambiguity(&name, &ext, &namespaces, source).await?
            {
                fixes.push(fix);
                notes.push(note);
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

/// Find the standalone definition, its twin in the other namespace, and
/// remove the twin when the two are identical modulo comments/whitespace.
async fn resolve_ambiguity(
    name: &str,
    ext: &str,
    qualified: &[String; 2],
    source: &dyn ContentSource,
) -> Result<Option<(Fix, String)>> {
    // Qualified names are `Namespace.X`; drop the trailing member
    let namespaces: Vec<String> = qualified
        .iter()
        .map(|q| q.rsplit_once('.').map_or(q.as_str(), |(ns, _)| ns).to_string())
        .collect();

    // Locate the standalone X.<ext> under either namespace directory
    let mut standalone: Option<(usize, String, String)> = None;
    for (idx, ns) in namespaces.iter().enumerate() {
        for dir in namespace_dirs(ns) {
            let path = format!("{dir}/{name}.{ext}");
            if let Some(content) = source.fetch_file(&path).await? {
                standalone = Some((idx, path, content));
                break;
            }
        }
        if standalone.is_some() {
            break;
        }
    }
    let Some((standalone_idx, standalone_path, standalone_content)) = standalone else {
        debug!("No standalone {name}.{ext} found for ambiguous reference");
        return Ok(None);
    };

    let Some(canonical_block) = blocks::find_definition(&standalone_content, name) else {
        return Ok(None);
    };
    let canonical_text = blocks::block_text(&standalone_content, &canonical_block);

    // Scan the sibling namespace directory for the duplicated definition
    let other_ns = &namespaces[1 - standalone_idx];
    for dir in namespace_dirs(other_ns) {
        for entry in source.list_dir(&dir).await? {
            if !entry.ends_with(&format!(".{ext}")) {
                continue;
            }
            let path = format!("{dir}/{entry}");
            if path == standalone_path {
                continue;
            }
            let Some(content) = source.fetch_file(&path).await? else {
                continue;
            };
            let Some(block) = blocks::find_definition(&content, name) else {
                continue;
            };

            let twin_text = blocks::block_text(&content, &block);
            if blocks::strip_comments_and_whitespace(&twin_text)
                != blocks::strip_comments_and_whitespace(&canonical_text)
            {
                debug!("Definitions of '{name}' diverge, leaving {path} alone");
                continue;
            }

            let new_content = blocks::remove_block(&content, &block);
            let note = format!("Removed duplicate {} '{name}' from {path}", block.kind);
            return Ok(Some((Fix::full(path, new_content), note)));
        }
    }

    Ok(None)
}

/// Candidate directories for a namespace: the dotted path as-is and under
/// a conventional `src/` root.
fn namespace_dirs(namespace: &str) -> Vec<String> {
    let dotted = namespace.replace('.', "/");
    vec![dotted.clone(), format!("src/{dotted}")]
}
