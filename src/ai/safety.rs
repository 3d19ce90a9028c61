//! Safety filtering of AI-returned fixes.
//!
//! Replacement fixes are small anchored edits and are accepted when every
//! search string is found verbatim in the fetched full file; a
//! multi-replacement fix applies all-or-nothing. Full-content fixes are
//! rejected for files the assistant only saw as a partial window, and for
//! suspiciously short content (truncation).

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::types::{Fix, ResolvedFix};

/// The current full content of a file plus how it was shown to the AI.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Full content at the branch tip
    pub content: String,
    /// Whether the assistant only saw a partial window
    pub partial_context: bool,
}

/// Validate and resolve AI fixes against current file snapshots.
///
/// Unsafe fixes are dropped individually; the survivors come back as
/// final file contents ready to commit.
#[must_use]
pub fn validate(
    fixes: Vec<Fix>,
    snapshots: &HashMap<String, FileSnapshot>,
    min_content_ratio: f64,
) -> Vec<ResolvedFix> {
    let mut resolved = Vec::new();

    for fix in fixes {
        if !fix.is_well_formed() {
            warn!("Dropping malformed fix for {}", fix.path);
            continue;
        }

        if let Some(replacements) = &fix.replacements {
            let Some(snapshot) = snapshots.get(&fix.path) else {
                warn!("Dropping replacement fix for unfetched file {}", fix.path);
                continue;
            };
            match apply_replacements(&snapshot.content, replacements) {
                Some(content) => resolved.push(ResolvedFix {
                    path: fix.path,
                    content,
                }),
                None => {
                    warn!(
                        "Dropping fix for {}: not all replacements matched",
                        fix.path
                    );
                }
            }
            continue;
        }

        let Some(content) = fix.content else {
            continue;
        };

        match snapshots.get(&fix.path) {
            Some(snapshot) if snapshot.partial_context => {
                warn!(
                    "Dropping full-content fix for partially-shown file {}",
                    fix.path
                );
            }
            Some(snapshot) => {
                #[allow(clippy::cast_precision_loss)]
                let ratio = content.len() as f64 / snapshot.content.len().max(1) as f64;
                if ratio < min_content_ratio {
                    warn!(
                        "Dropping truncated content fix for {} ({:.0}% of original)",
                        fix.path,
                        ratio * 100.0
                    );
                } else {
                    resolved.push(ResolvedFix {
                        path: fix.path,
                        content,
                    });
                }
            }
            None => {
                // A file the AI was never shown: treat as a new file
                debug!("Accepting new-file fix for {}", fix.path);
                resolved.push(ResolvedFix {
                    path: fix.path,
                    content,
                });
            }
        }
    }

    resolved
}

/// Apply all replacements, or none: every search string must occur
/// verbatim in the current content.
#[must_use]
pub fn apply_replacements(
    content: &str,
    replacements: &[crate::types::Replacement],
) -> Option<String> {
    if replacements.is_empty() {
        return None;
    }
    if !replacements.iter().all(|r| content.contains(&r.search)) {
        return None;
    }
    let mut out = content.to_string();
    for replacement in replacements {
        out = out.replace(&replacement.search, &replacement.replace);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Replacement;

    fn snapshot(content: &str, partial: bool) -> FileSnapshot {
        FileSnapshot {
            content: content.to_string(),
            partial_context: partial,
        }
    }

    fn snapshots_with(path: &str, snap: FileSnapshot) -> HashMap<String, FileSnapshot> {
        let mut map = HashMap::new();
        map.insert(path.to_string(), snap);
        map
    }

    #[test]
    fn test_all_replacements_apply() {
        let snapshots = snapshots_with("src/A.cs", snapshot("let a = 1;\nlet b = 2;\n", false));
        let fixes = vec![Fix::anchored(
            "src/A.cs",
            vec![
                Replacement {
                    search: "let a = 1;".into(),
                    replace: "let a = 10;".into(),
                },
                Replacement {
                    search: "let b = 2;".into(),
                    replace: "let b = 20;".into(),
                },
            ],
        )];

        let resolved = validate(fixes, &snapshots, 0.3);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].content, "let a = 10;\nlet b = 20;\n");
    }

    #[test]
    fn test_partial_match_rejects_whole_fix() {
        let snapshots = snapshots_with("src/A.cs", snapshot("let a = 1;\n", false));
        let fixes = vec![Fix::anchored(
            "src/A.cs",
            vec![
                Replacement {
                    search: "let a = 1;".into(),
                    replace: "let a = 10;".into(),
                },
                Replacement {
                    search: "this text is absent".into(),
                    replace: "anything".into(),
                },
            ],
        )];

        // One of two searches misses: zero replacements are written
        let resolved = validate(fixes, &snapshots, 0.3);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_content_fix_rejected_for_partial_context() {
        let snapshots = snapshots_with("src/A.cs", snapshot(&"x".repeat(1000), true));
        let fixes = vec![Fix::full("src/A.cs", "y".repeat(900))];
        let resolved = validate(fixes, &snapshots, 0.3);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_truncated_content_rejected() {
        let snapshots = snapshots_with("src/A.cs", snapshot(&"x".repeat(1000), false));
        let fixes = vec![Fix::full("src/A.cs", "y".repeat(100))];
        let resolved = validate(fixes, &snapshots, 0.3);
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_adequate_content_accepted() {
        let snapshots = snapshots_with("src/A.cs", snapshot(&"x".repeat(1000), false));
        let fixes = vec![Fix::full("src/A.cs", "y".repeat(700))];
        let resolved = validate(fixes, &snapshots, 0.3);
        assert_eq!(resolved.len(), 1);
    }
}
