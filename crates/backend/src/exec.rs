//! Command output content source
//!
//! The target is split on whitespace into a program and its arguments; there
//! is no quoting, so arguments cannot contain spaces. The whole standard
//! output is captured, and the size is only known once the command exits
//! successfully within its deadline.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::debug;

use crate::error::{BackendError, Result};
use crate::source::{Content, ContentSource, Mode};

/// Content source backed by a command's standard output
#[derive(Debug, Clone)]
pub struct ExecSource {
    command: String,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl ExecSource {
    pub fn new(command: impl Into<String>, env: Vec<(String, String)>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            env,
            timeout,
        }
    }

    /// Run the command and capture its whole output
    pub async fn run(&self) -> Result<Bytes> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next().ok_or(BackendError::EmptyCommand)?;

        let mut command = Command::new(program);
        command
            .args(parts)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Dropping the future on timeout drops the child, which kills it
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(BackendError::CommandFailed(output.status));
        }
        Ok(Bytes::from(output.stdout))
    }
}

#[async_trait]
impl ContentSource for ExecSource {
    fn mode(&self) -> Mode {
        Mode::Exec
    }

    fn target(&self) -> &str {
        &self.command
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Content> {
        let start = Instant::now();
        let result = self.run().await.map(|output| {
            let total = output.len() as u64;
            let begin = offset.min(total) as usize;
            let end = offset.saturating_add(length).min(total) as usize;
            Content::new(total, output.slice(begin..end))
        });
        debug!(
            target = %self.command,
            total = result.as_ref().map(|c| c.total as i64).unwrap_or(-1),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "EXEC run"
        );
        result
    }
}
