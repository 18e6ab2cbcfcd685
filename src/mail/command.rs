//! Mail delivery through an external command.
//!
//! The command runs under `sh -c` in the work repository. It receives the
//! `PatchSeriesRequest` as JSON on stdin and must print the `SentSeries` as
//! JSON on stdout. A non-zero exit fails the send with its stderr.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::{MailSender, PatchSeriesRequest, SentSeries};
use crate::bridge_config::BridgeConfig;

pub struct CommandMailer {
    command: String,
    working_dir: PathBuf,
    timeout_secs: u64,
}

impl CommandMailer {
    pub fn new(command: impl Into<String>, working_dir: &Path, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.to_path_buf(),
            timeout_secs,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let command = config
            .toml
            .mail
            .command
            .clone()
            .context("mail.command must be set in bridge.toml to send patch series")?;
        Ok(Self::new(
            command,
            &config.repo_dir,
            config.toml.mail.timeout_secs,
        ))
    }
}

#[async_trait]
impl MailSender for CommandMailer {
    async fn send_series(&self, request: &PatchSeriesRequest) -> Result<SentSeries> {
        let request_json =
            serde_json::to_string(request).context("Failed to serialize patch series request")?;

        debug!(command = %self.command, tag = %request.tag, "running mail command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PATCHBRIDGE_TAG", &request.tag)
            .env("PATCHBRIDGE_MODE", request.mode.as_str())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn mail command: {}", self.command))?;

        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take()
                && let Err(e) = stdin.write_all(request_json.as_bytes()).await
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                // a command that exits without reading is judged by its exit status
                return Err(e).context("Failed to write request to mail command stdin");
            }
            child
                .wait_with_output()
                .await
                .context("Failed to wait for mail command")
        };

        // dropping the exchange on timeout kills the child
        let timeout_duration = Duration::from_secs(self.timeout_secs);
        let output = match timeout(timeout_duration, exchange).await {
            Ok(result) => result?,
            Err(_) => anyhow::bail!(
                "Mail command timed out after {} seconds",
                self.timeout_secs
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Mail command failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let sent: SentSeries = serde_json::from_str(stdout.trim())
            .context("Failed to parse mail command output as a sent series")?;
        info!(
            tag = %request.tag,
            message_id = sent.primary_message_id().unwrap_or(""),
            patches = sent.patches.len(),
            "patch series handed to mail command"
        );
        Ok(sent)
    }
}
