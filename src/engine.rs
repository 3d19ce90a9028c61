//! Remediation orchestrator.
//!
//! The top-level state machine for one invocation:
//! loop-guard -> cooldown-check -> {flaky-rerun | lockfile | format |
//! build-analysis} -> {publish | escalate | manual-issue}. Every proceed
//! path that reaches a terminal outcome records the attempt, and exactly
//! one user-visible outcome is produced per run.

use anyhow::Result;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::ai;
use crate::collect::ErrorCollector;
use crate::config::RemedyConfig;
use crate::escalate;
use crate::fixers::{self, ContentSource, FixerOutcome, FixerRegistry, RepoAtRef};
use crate::flaky;
use crate::github::GhClient;
use crate::process::ProcessRunner;
use crate::publish;
use crate::signature;
use crate::state::cooldown::{AttemptOutcome, CooldownDecision, CooldownTracker};
use crate::state::patterns::PatternStore;
use crate::types::{FailedJob, Fix, FixOrigin, ResolvedFix, RunOutcome};

pub struct Engine {
    config: RemedyConfig,
    gh: GhClient,
    repo: String,
    run_id: u64,
    patterns: PatternStore,
    cooldowns: CooldownTracker,
    runner: Box<dyn ProcessRunner>,
}

impl Engine {
    #[must_use]
    pub fn new(
        repo: &str,
        run_id: u64,
        config: RemedyConfig,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        let gh = GhClient::new(repo, config.gh_timeout_secs, config.gh_max_retries);
        let patterns = PatternStore::new(&config);
        let cooldowns = CooldownTracker::new(&config);
        Self {
            config,
            gh,
            repo: repo.to_string(),
            run_id,
            patterns,
            cooldowns,
            runner,
        }
    }

    /// Run the full remediation state machine for this invocation.
    pub async fn run(&self) -> Result<RunOutcome> {
        let run = self.gh.run_info(self.run_id).await?;

        // 1. Loop guard: never remediate our own remediation branches
        if run.branch.starts_with(&self.config.branch_prefix) {
            info!("Run {} is on remediation branch {}, aborting", self.run_id, run.branch);
            return Ok(RunOutcome::Skipped {
                reason: format!("remediation branch {}", run.branch),
            });
        }

        // 2. Collect structured errors and derive the primary signature
        let collector = ErrorCollector::new(self.gh.clone(), self.config.log_tail_lines);
        let jobs = collector.collect(self.run_id).await;
        let sig = signature::derive(&jobs)
            .unwrap_or_else(|| format!("workflow failure on {} (run {})", run.branch, self.run_id));
        info!("Primary error signature: {sig}");

        // 3. Cooldown / escalation check
        match self.cooldowns.check(&self.repo, &sig)? {
            CooldownDecision::Skip => {
                info!("Cooldown active for this signature, skipping run");
                return Ok(RunOutcome::Skipped {
                    reason: "cooldown active".to_string(),
                });
            }
            CooldownDecision::Escalate => {
                let attempts = self.config.max_attempts_before_escalation;
                let url =
                    escalate::open_escalation_issue(&self.gh, self.run_id, &sig, attempts, &jobs)
                        .await?;
                self.cooldowns
                    .record_attempt(&self.repo, &sig, AttemptOutcome::Escalated)?;
                return Ok(RunOutcome::Escalated { issue_url: url });
            }
            CooldownDecision::Proceed => {}
        }

        // 4. Flaky infrastructure: rerun instead of patching
        if let Some(marker) = flaky::should_rerun(&jobs) {
            info!("Transient infrastructure failure detected ({marker}), rerunning");
            self.gh.rerun_failed_jobs(self.run_id).await?;
            self.cooldowns
                .record_attempt(&self.repo, &sig, AttemptOutcome::Fixed)?;
            return Ok(RunOutcome::Rerun);
        }

        // 5. Shell-mediated passes run whenever their triggers are present
        let process_timeout = Duration::from_secs(self.config.process_timeout_secs);
        let mut side_prs: Vec<String> = Vec::new();
        if let Some(manager) = fixers::lockfile::triggered(&jobs) {
            match fixers::lockfile::run(
                manager,
                &self.repo,
                &run.branch,
                &self.gh,
                self.runner.as_ref(),
                process_timeout,
            )
            .await
            {
                Ok(Some(url)) => side_prs.push(url),
                Ok(None) => {}
                Err(e) => warn!("Lockfile pass failed: {e}"),
            }
        }
        if fixers::formatter::triggered(&jobs) {
            match fixers::formatter::run(
                &self.repo,
                &run.branch,
                &self.gh,
                self.runner.as_ref(),
                process_timeout,
            )
            .await
            {
                Ok(Some(url)) => side_prs.push(url),
                Ok(None) => {}
                Err(e) => warn!("Formatter pass failed: {e}"),
            }
        }

        // 6. Build analysis: deterministic fixers first, AI for the rest.
        // Content is read at the failing commit, not the moving branch tip.
        let source = RepoAtRef::new(self.gh.clone(), &run.sha);
        let registry = FixerRegistry::new();
        let deterministic = registry.apply_all(&jobs, &source).await;

        let (resolved, explanation, origin) = if deterministic.is_empty() {
            if has_analyzable_errors(&jobs) {
                let hint = self.patterns.find_match(&jobs)?;
                let chain = ai::run_chain(
                    &self.config,
                    &self.repo,
                    &jobs,
                    hint.as_ref(),
                    &source,
                    self.runner.as_ref(),
                )
                .await?;
                let origin = FixOrigin::Ai {
                    pattern_id: hint.as_ref().map(|p| p.id.clone()),
                    pattern_confidence: hint.as_ref().map(|p| p.confidence),
                };
                (chain.fixes, chain.explanation, origin)
            } else {
                (Vec::new(), String::new(), FixOrigin::Deterministic("none"))
            }
        } else {
            let (fixes, explanation) = flatten_outcomes(&deterministic);
            let resolved = resolve_fixes(fixes, &source).await;
            (resolved, explanation, FixOrigin::Deterministic("fixers"))
        };

        // 7. Publish, or fall back to a manual-review issue
        if !resolved.is_empty() {
            match self
                .publish_fix_set(&run.branch, &resolved, &sig, &explanation, &origin)
                .await
            {
                Ok(url) => {
                    self.learn_from_success(&sig, &explanation, &origin, &resolved)?;
                    self.cooldowns
                        .record_attempt(&self.repo, &sig, AttemptOutcome::Fixed)?;
                    return Ok(RunOutcome::PullRequest { url });
                }
                Err(e) => {
                    warn!("Publish failed, falling back to manual review: {e}");
                    if let FixOrigin::Ai {
                        pattern_id: Some(id),
                        ..
                    } = &origin
                    {
                        self.patterns.record_hit(id, &self.repo, false)?;
                    }
                }
            }
        }

        if let Some(url) = side_prs.into_iter().next() {
            // A shell pass already opened the corrective PR
            self.cooldowns
                .record_attempt(&self.repo, &sig, AttemptOutcome::Fixed)?;
            return Ok(RunOutcome::PullRequest { url });
        }

        let url = escalate::open_manual_issue(&self.gh, self.run_id, &sig, &jobs).await?;
        self.cooldowns
            .record_attempt(&self.repo, &sig, AttemptOutcome::Failed)?;
        Ok(RunOutcome::ManualIssue { issue_url: url })
    }

    async fn publish_fix_set(
        &self,
        base_branch: &str,
        resolved: &[ResolvedFix],
        sig: &str,
        explanation: &str,
        origin: &FixOrigin,
    ) -> Result<String> {
        let title = format!("Fix CI failure in run {}", self.run_id);
        let body = format!(
            "Automated remediation for [run {}](https://github.com/{}/actions/runs/{}).\n\n\
             **Error signature**: `{sig}`\n\n{explanation}\n",
            self.run_id, self.repo, self.run_id
        );

        let pattern_confidence = match origin {
            FixOrigin::Ai {
                pattern_confidence, ..
            } => *pattern_confidence,
            FixOrigin::Deterministic(_) => None,
        };
        let auto_merge = publish::auto_merge_eligible(
            resolved,
            pattern_confidence,
            self.config.auto_merge_max_files,
            self.config.auto_merge_max_lines,
            self.config.auto_merge_min_confidence,
        );

        let pr = publish::publish(
            &self.gh,
            base_branch,
            resolved,
            &title,
            &body,
            &self.config.branch_prefix,
            self.run_id,
            auto_merge,
        )
        .await?;
        info!(
            "Published PR {:?} from branch {} ({} file(s))",
            pr.number,
            pr.branch,
            resolved.len()
        );
        Ok(pr.url)
    }

    /// Pattern bookkeeping after a successful publish.
    fn learn_from_success(
        &self,
        sig: &str,
        explanation: &str,
        origin: &FixOrigin,
        resolved: &[ResolvedFix],
    ) -> Result<()> {
        let FixOrigin::Ai { pattern_id, .. } = origin else {
            return Ok(());
        };
        match pattern_id {
            Some(id) => {
                self.patterns.record_hit(id, &self.repo, true)?;
            }
            None => {
                let fix_type = if resolved.len() == 1 { "content" } else { "multi-file" };
                self.patterns
                    .add_new(sig, explanation, fix_type, "build", &self.repo)?;
            }
        }
        Ok(())
    }
}

/// Whether the run carries anything worth sending to an assistant.
#[must_use]
pub fn has_analyzable_errors(jobs: &[FailedJob]) -> bool {
    jobs.iter()
        .any(|j| !j.annotations.is_empty() || !j.log_text.trim().is_empty())
}

/// Merge fixer outcomes into one fix list and a combined explanation,
/// deduplicating by path (first fixer wins).
fn flatten_outcomes(outcomes: &[FixerOutcome]) -> (Vec<Fix>, String) {
    let mut fixes: Vec<Fix> = Vec::new();
    let mut notes = Vec::new();
    for outcome in outcomes {
        for fix in &outcome.fixes {
            if !fixes.iter().any(|f| f.path == fix.path) {
                fixes.push(fix.clone());
            }
        }
        notes.push(outcome.explanation.clone());
    }
    (fixes, notes.join("; "))
}

/// Resolve deterministic fixes to final file contents. Replacement fixes
/// are applied all-or-nothing against freshly fetched content.
async fn resolve_fixes(fixes: Vec<Fix>, source: &dyn ContentSource) -> Vec<ResolvedFix> {
    let mut cache: HashMap<String, Option<String>> = HashMap::new();
    let mut resolved = Vec::new();

    for fix in fixes {
        if let Some(content) = fix.content {
            resolved.push(ResolvedFix {
                path: fix.path,
                content,
            });
            continue;
        }
        let Some(replacements) = fix.replacements else {
            continue;
        };
        let current = match cache.get(&fix.path) {
            Some(cached) => cached.clone(),
            None => {
                let fetched = source.fetch_file(&fix.path).await.ok().flatten();
                cache.insert(fix.path.clone(), fetched.clone());
                fetched
            }
        };
        let Some(current) = current else {
            warn!("Cannot resolve replacement fix for missing file {}", fix.path);
            continue;
        };
        match ai::safety::apply_replacements(&current, &replacements) {
            Some(content) => resolved.push(ResolvedFix {
                path: fix.path,
                content,
            }),
            None => warn!("Replacements did not all match for {}", fix.path),
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixers::testing::FakeRepo;
    use crate::types::{Annotation, Replacement};

    fn job(annotations: Vec<Annotation>, log: &str) -> FailedJob {
        FailedJob {
            id: 1,
            name: "build".into(),
            annotations,
            log_text: log.into(),
        }
    }

    #[test]
    fn test_analyzable_errors_detection() {
        assert!(!has_analyzable_errors(&[]));
        assert!(!has_analyzable_errors(&[job(vec![], "   ")]));
        assert!(has_analyzable_errors(&[job(vec![], "error output")]));
    }

    #[test]
    fn test_flatten_dedups_by_path() {
        let outcomes = vec![
            FixerOutcome {
                fixes: vec![Fix::full("src/A.cs", "first")],
                explanation: "one".into(),
            },
            FixerOutcome {
                fixes: vec![Fix::full("src/A.cs", "second"), Fix::full("src/B.cs", "b")],
                explanation: "two".into(),
            },
        ];
        let (fixes, explanation) = flatten_outcomes(&outcomes);
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].content.as_deref(), Some("first"));
        assert_eq!(explanation, "one; two");
    }

    #[tokio::test]
    async fn test_resolve_applies_replacements_all_or_nothing() {
        let mut repo = FakeRepo::new();
        repo.add("src/A.cs", "int x = 1;\n");

        let good = Fix::anchored(
            "src/A.cs",
            vec![Replacement {
                search: "int x = 1;".into(),
                replace: "int x = 2;".into(),
            }],
        );
        let bad = Fix::anchored(
            "src/A.cs",
            vec![Replacement {
                search: "not present".into(),
                replace: "anything".into(),
            }],
        );

        let resolved = resolve_fixes(vec![good, bad], &repo).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].content, "int x = 2;\n");
    }
}
