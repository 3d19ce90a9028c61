//! Bounded external-process adapter.
//!
//! The shell-mediated fixers and the primary AI assistant run external
//! commands (git, package managers, formatters, the assistant CLI). This
//! trait keeps them testable with a fake runner and enforces an explicit
//! timeout with kill-on-expiry.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Captured output of a completed process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    /// Check for a zero exit code.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands with a bounded lifetime.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` in `cwd`, optionally feeding stdin, and
    /// wait up to `timeout` before killing the process.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ProcessOutput>;
}

/// Production runner backed by tokio's process support.
pub struct TokioRunner;

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ProcessOutput> {
        debug!("exec {} {}", program, args.join(" "));

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {program}"))?;

        if let Some(input) = stdin {
            let mut pipe = child.stdin.take().context("stdin unavailable")?;
            pipe.write_all(input.as_bytes())
                .await
                .context("Failed to write stdin")?;
            drop(pipe);
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{program} timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("Failed to collect {program} output"))?;

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! A scripted fake runner for fixer tests.

    use super::{ProcessOutput, ProcessRunner};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays queued responses and records invocations.
    #[derive(Default)]
    pub struct FakeRunner {
        responses: Mutex<VecDeque<ProcessOutput>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn enqueue(&self, stdout: &str, exit_code: i32) {
            self.responses.lock().unwrap().push_back(ProcessOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code,
            });
        }

        pub fn recorded(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for FakeRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            _cwd: Option<&Path>,
            _stdin: Option<&str>,
            _timeout: Duration,
        ) -> Result<ProcessOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{program} {}", args.join(" ")));
            match self.responses.lock().unwrap().pop_front() {
                Some(output) => Ok(output),
                None => bail!("FakeRunner exhausted for {program}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_and_captures_output() {
        let runner = TokioRunner;
        let out = runner
            .run(
                "echo",
                &["hello".to_string()],
                None,
                None,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = TokioRunner;
        let result = runner
            .run(
                "sleep",
                &["5".to_string()],
                None,
                None,
                Duration::from_millis(100),
            )
            .await;
        assert!(result.is_err());
    }
}
