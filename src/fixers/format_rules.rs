//! Formatting-rule autofixer.
//!
//! Applies line-level transforms for a fixed set of style-rule codes and
//! suppresses the rest through the project lint configuration instead of
//! touching source:
//! - SA1028: strip trailing whitespace
//! - SA1507: collapse runs of three or more blank lines
//! - SA1513: blank line after a closing brace (except before
//!   else/catch/finally/while or another closer)
//! - SA1124: strip region markers
//!
//! Any other rule code seen in annotations gets a severity override
//! appended to `.editorconfig`.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::{ContentSource, Fixer, FixerOutcome};
use crate::types::{FailedJob, Fix};

static RULE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b((?:SA|CA|IDE)\d{4})\b").unwrap());

/// Rule codes with a line-level transform.
const FIXABLE: &[&str] = &["SA1028", "SA1507", "SA1513", "SA1124"];

/// Lint configuration file receiving suppressions.
const LINT_CONFIG: &str = ".editorconfig";

pub struct FormatRulesFixer;

#[async_trait]
impl Fixer for FormatRulesFixer {
    fn name(&self) -> &'static str {
        "format-rules"
    }

    fn can_handle(&self, jobs: &[FailedJob]) -> bool {
        jobs.iter()
            .flat_map(|j| &j.annotations)
            .any(|a| RULE_CODE.is_match(&a.message))
    }

    async fn apply(
        &self,
        jobs: &[FailedJob],
        source: &dyn ContentSource,
    ) -> Result<Option<FixerOutcome>> {
        // Group fixable codes per file; everything else is suppressed.
        let mut per_file: BTreeMap<String, BTreeSet<&'static str>> = BTreeMap::new();
        let mut unfixable: BTreeSet<String> = BTreeSet::new();

        for annotation in jobs.iter().flat_map(|j| &j.annotations) {
            for cap in RULE_CODE.captures_iter(&annotation.message) {
                let code = cap[1].to_string();
                if let Some(known) = FIXABLE.iter().copied().find(|f| *f == code) {
                    if !annotation.path.is_empty() {
                        per_file
                            .entry(annotation.path.clone())
                            .or_default()
                            .insert(known);
                    }
                } else {
                    unfixable.insert(code);
                }
            }
        }

        let mut fixes = Vec::new();
        let mut notes = Vec::new();

        for (path, codes) in &per_file {
            let Some(content) = source.fetch_file(path).await? else {
                continue;
            };
            let transformed = apply_transforms(&content, codes);
            if transformed != content {
                notes.push(format!(
                    "Applied {} to {path}",
                    codes.iter().copied().collect::<Vec<_>>().join(", ")
                ));
                fixes.push(Fix::full(path.clone(), transformed));
            }
        }

        if !unfixable.is_empty() {
            let existing = source.fetch_file(LINT_CONFIG).await?.unwrap_or_default();
            if let Some(updated) = append_suppressions(&existing, &unfixable) {
                notes.push(format!(
                    "Suppressed {} in {LINT_CONFIG}",
                    unfixable.iter().cloned().collect::<Vec<_>>().join(", ")
                ));
                fixes.push(Fix::full(LINT_CONFIG, updated));
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

/// Apply the transforms for the given codes, in a stable order.
fn apply_transforms(content: &str, codes: &BTreeSet<&'static str>) -> String {
    let mut out = content.to_string();
    if codes.contains("SA1028") {
        out = strip_trailing_whitespace(&out);
    }
    if codes.contains("SA1124") {
        out = strip_region_markers(&out);
    }
    if codes.contains("SA1513") {
        out = blank_line_after_closing_brace(&out);
    }
    if codes.contains("SA1507") {
        out = collapse_blank_runs(&out);
    }
    out
}

fn strip_trailing_whitespace(content: &str) -> String {
    rejoin(content, content.lines().map(str::trim_end).collect())
}

fn strip_region_markers(content: &str) -> String {
    rejoin(
        content,
        content
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                !trimmed.starts_with("#region") && !trimmed.starts_with("#endregion")
            })
            .collect(),
    )
}

/// Insert a blank line after `}` unless the next line continues the
/// statement (else/catch/finally/while) or closes an enclosing scope.
fn blank_line_after_closing_brace(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        out.push((*line).to_string());
        if line.trim() != "}" {
            continue;
        }
        let Some(next) = lines.get(i + 1) else {
            continue;
        };
        let next_trimmed = next.trim_start();
        if next_trimmed.is_empty() {
            continue;
        }
        let continues = ["else", "catch", "finally", "while"]
            .iter()
            .any(|kw| next_trimmed.starts_with(kw));
        let closes = next_trimmed.starts_with('}') || next_trimmed.starts_with(')');
        if !continues && !closes {
            out.push(String::new());
        }
    }

    rejoin(content, out.iter().map(String::as_str).collect())
}

/// Collapse runs of three or more blank lines down to one.
fn collapse_blank_runs(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut run = 0usize;

    for line in lines {
        if line.trim().is_empty() {
            run += 1;
        } else {
            if run >= 3 {
                // Drop the run we queued, keep a single separator
                for _ in 0..run {
                    out.pop();
                }
                out.push("");
            }
            run = 0;
        }
        out.push(line);
    }
    if run >= 3 {
        for _ in 0..run {
            out.pop();
        }
        out.push("");
    }

    rejoin(content, out)
}

/// Append `dotnet_diagnostic` severity overrides for codes not already
/// configured. Returns `None` when nothing needs appending.
fn append_suppressions(existing: &str, codes: &BTreeSet<String>) -> Option<String> {
    let missing: Vec<&String> = codes
        .iter()
        .filter(|code| !existing.contains(&format!("dotnet_diagnostic.{code}.severity")))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let mut out = existing.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    if !out.contains("[*.cs]") {
        out.push_str("\n[*.cs]\n");
    }
    for code in missing {
        out.push_str(&format!("dotnet_diagnostic.{code}.severity = none\n"));
    }
    Some(out)
}

fn rejoin(original: &str, lines: Vec<&str>) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') {
        out.push('\n');
    }
    out
}
