//! Primary AI assistant: a local CLI driven through the process adapter.
//!
//! The prompt goes in on stdin; whatever comes back on stdout is run
//! through the staged decoder. A missing binary or a nonzero exit means
//! "unavailable", not a crash - the chain falls through to the secondary.

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, warn};

use super::parse::{self, AiResponse};
use crate::process::ProcessRunner;

pub struct PrimaryAssistant<'a> {
    runner: &'a dyn ProcessRunner,
    command: Vec<String>,
    timeout: Duration,
}

impl<'a> PrimaryAssistant<'a> {
    #[must_use]
    pub fn new(runner: &'a dyn ProcessRunner, command: Vec<String>, timeout: Duration) -> Self {
        Self {
            runner,
            command,
            timeout,
        }
    }

    /// Ask the local assistant for fixes. `None` means unavailable or
    /// undecodable output; the caller falls through to the secondary.
    pub async fn complete(&self, prompt: &str) -> Result<Option<AiResponse>> {
        let Some((program, args)) = self.command.split_first() else {
            return Ok(None);
        };

        let output = match self
            .runner
            .run(program, args, None, Some(prompt), self.timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Primary assistant unavailable: {e}");
                return Ok(None);
            }
        };

        if !output.success() {
            warn!(
                "Primary assistant exited {}: {}",
                output.exit_code,
                output.stderr.trim()
            );
            return Ok(None);
        }

        match parse::decode(&output.stdout) {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                debug!("Primary assistant output undecodable: {e}");
                Ok(None)
            }
        }
    }
}
