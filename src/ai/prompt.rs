//! Prompt assembly for the AI assistants.
//!
//! The prompt carries per-job annotations, raw log tails only for jobs
//! with no annotations, and file content for every annotated path. Total
//! file content is hard-capped; files over the remaining budget are sent
//! as a window around their first annotated line and marked partial so
//! the safety filter can reject whole-file rewrites against them.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::fixers::ContentSource;
use crate::state::patterns::Pattern;
use crate::types::FailedJob;

/// Lines of context around the first annotated line of a partial file.
const PARTIAL_WINDOW_LINES: usize = 120;

/// A file included in the prompt.
#[derive(Debug, Clone)]
pub struct FileContext {
    pub path: String,
    /// The content as sent (full file or a partial window)
    pub sent_content: String,
    /// Whether only a window was sent
    pub partial: bool,
}

/// Gather file contexts for every annotated path, within the byte budget.
pub async fn gather_files(
    jobs: &[FailedJob],
    source: &dyn ContentSource,
    max_total_bytes: usize,
) -> Vec<FileContext> {
    // First annotated line per path, in first-seen order
    let mut first_line: BTreeMap<String, u64> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for annotation in jobs.iter().flat_map(|j| &j.annotations) {
        if annotation.path.is_empty() {
            continue;
        }
        if !first_line.contains_key(&annotation.path) {
            order.push(annotation.path.clone());
        }
        first_line
            .entry(annotation.path.clone())
            .or_insert(annotation.start_line);
    }

    let mut remaining = max_total_bytes;
    let mut files = Vec::new();
    for path in order {
        if remaining == 0 {
            break;
        }
        let Ok(Some(content)) = source.fetch_file(&path).await else {
            continue;
        };

        if content.len() <= remaining {
            remaining -= content.len();
            files.push(FileContext {
                path,
                sent_content: content,
                partial: false,
            });
        } else {
            let line = first_line.get(&path).copied().unwrap_or(0) as usize;
            let window = window_around(&content, line, PARTIAL_WINDOW_LINES);
            let take = window.len().min(remaining);
            remaining -= take;
            files.push(FileContext {
                path,
                sent_content: window[..take].to_string(),
                partial: true,
            });
        }
    }
    files
}

/// Build the full prompt text.
#[must_use]
pub fn build(
    repo: &str,
    jobs: &[FailedJob],
    files: &[FileContext],
    hint: Option<&Pattern>,
    max_log_bytes_per_job: usize,
) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are fixing a failed CI run in the repository {repo}.\n"
    );

    if let Some(pattern) = hint {
        let _ = writeln!(
            prompt,
            "A previously successful fix for this error signature is known:\n\
             - signature: {}\n\
             - fix: {}\n\
             Use it as guidance, but verify it against the errors below.\n",
            pattern.signature, pattern.fix
        );
    }

    for job in jobs {
        let _ = writeln!(prompt, "## Failed job: {}\n", job.name);
        if job.annotations.is_empty() {
            let tail = truncate_to_bytes(&job.log_text, max_log_bytes_per_job);
            let _ = writeln!(prompt, "No structured annotations. Log tail:\n```\n{tail}\n```\n");
        } else {
            for annotation in &job.annotations {
                let _ = writeln!(
                    prompt,
                    "- {} line {}: {}",
                    annotation.path, annotation.start_line, annotation.message
                );
            }
            prompt.push('\n');
        }
    }

    for file in files {
        let marker = if file.partial {
            " (partial excerpt - use replacements, not full content)"
        } else {
            ""
        };
        let _ = writeln!(
            prompt,
            "## File: {}{marker}\n```\n{}\n```\n",
            file.path, file.sent_content
        );
    }

    prompt.push_str(
        "Respond with JSON only: {\"fixes\": [{\"path\": \"...\", \"content\": \"...\"} or \
         {\"path\": \"...\", \"replacements\": [{\"search\": \"...\", \"replace\": \"...\"}]}], \
         \"explanation\": \"...\"}.\n\
         For files marked as partial excerpts, only replacements are accepted.\n",
    );

    prompt
}

/// A line window centered on `line` (1-based annotation line numbers).
fn window_around(content: &str, line: usize, window: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let center = line.saturating_sub(1).min(lines.len().saturating_sub(1));
    let start = center.saturating_sub(window / 2);
    let end = (start + window).min(lines.len());
    lines[start..end].join("\n")
}

fn truncate_to_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    // Keep the tail; errors cluster at the end of logs
    let mut cut = text.len() - max;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    &text[cut..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixers::testing::FakeRepo;
    use crate::types::Annotation;

    fn annotated_job(path: &str, line: u64, message: &str) -> FailedJob {
        FailedJob {
            id: 1,
            name: "build".into(),
            annotations: vec![Annotation {
                path: path.into(),
                start_line: line,
                end_line: line,
                severity: "failure".into(),
                message: message.into(),
            }],
            log_text: String::new(),
        }
    }

    #[tokio::test]
    async fn test_small_file_sent_whole() {
        let mut repo = FakeRepo::new();
        repo.add("src/A.cs", "class A { }\n");

        let jobs = vec![annotated_job("src/A.cs", 1, "CS0000: broken")];
        let files = gather_files(&jobs, &repo, 60 * 1024).await;
        assert_eq!(files.len(), 1);
        assert!(!files[0].partial);
    }

    #[tokio::test]
    async fn test_oversized_file_sent_as_partial_window() {
        let big: String = (0..5000).map(|i| format!("line {i}\n")).collect();
        let mut repo = FakeRepo::new();
        repo.add("src/Big.cs", &big);

        let jobs = vec![annotated_job("src/Big.cs", 2500, "CS0000: broken")];
        let files = gather_files(&jobs, &repo, 4 * 1024).await;
        assert_eq!(files.len(), 1);
        assert!(files[0].partial);
        assert!(files[0].sent_content.len() <= 4 * 1024);
        assert!(files[0].sent_content.contains("line 2460"));
    }

    #[tokio::test]
    async fn test_budget_caps_total_content() {
        let chunk = "x".repeat(1000);
        let mut repo = FakeRepo::new();
        for i in 0..10 {
            repo.add(&format!("src/F{i}.cs"), &chunk);
        }
        let jobs: Vec<FailedJob> = (0..10)
            .map(|i| annotated_job(&format!("src/F{i}.cs"), 1, "CS0000: broken"))
            .collect();

        let files = gather_files(&jobs, &repo, 3500).await;
        let total: usize = files.iter().map(|f| f.sent_content.len()).sum();
        assert!(total <= 3500);
    }

    #[test]
    fn test_prompt_includes_log_only_for_annotationless_jobs() {
        let annotated = annotated_job("src/A.cs", 1, "CS0000: broken");
        let bare = FailedJob {
            id: 2,
            name: "e2e".into(),
            annotations: vec![],
            log_text: "some failure output".into(),
        };

        let prompt = build("acme/widgets", &[annotated, bare], &[], None, 3 * 1024);
        assert!(prompt.contains("CS0000"));
        assert!(prompt.contains("some failure output"));
        // The annotated job's (empty) log is not inlined
        assert_eq!(prompt.matches("Log tail:").count(), 1);
    }

    #[test]
    fn test_hint_enriches_prompt() {
        let pattern = Pattern {
            id: "pat-1".into(),
            category: "build".into(),
            signature: "CS0101: duplicate".into(),
            fix: "remove the duplicate class".into(),
            fix_type: "content".into(),
            repos_seen: vec![],
            occurrences: 3,
            confidence: 0.9,
        };
        let prompt = build("acme/widgets", &[], &[], Some(&pattern), 1024);
        assert!(prompt.contains("remove the duplicate class"));
    }
}
