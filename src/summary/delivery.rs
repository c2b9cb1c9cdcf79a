//! Where summaries go.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::Summary;
use crate::config::DeliveryConfig;
use crate::global;

/// Environment variable names passed to delivery commands.
pub mod delivery_env {
    pub const INVITE_ID: &str = "SCRIBE_INVITE_ID";
    pub const SUBJECT: &str = "SCRIBE_SUBJECT";
    pub const RECIPIENTS: &str = "SCRIBE_RECIPIENTS";
    pub const SENDER: &str = "SCRIBE_SENDER";
    pub const SUMMARY_DIR: &str = "SCRIBE_SUMMARY_DIR";
}

#[async_trait]
pub trait SummaryDelivery: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, summary: &Summary) -> Result<()>;
}

pub fn delivery_from_config(config: &DeliveryConfig) -> Result<Arc<dyn SummaryDelivery>> {
    let delivery: Arc<dyn SummaryDelivery> = match config.mode.as_str() {
        "file" => Arc::new(FileDelivery::new(global::summaries_dir()?)),
        "command" => {
            if config.command.trim().is_empty() {
                bail!("delivery.command is required for command delivery");
            }
            Arc::new(CommandDelivery::new(
                config.command.clone(),
                config.sender.clone(),
                global::summaries_dir()?,
            ))
        }
        other => bail!(
            "Unknown delivery mode '{}'. Supported modes: file, command",
            other
        ),
    };
    Ok(delivery)
}

/// Writes each summary into `<dir>/<invite id>/`: `summary.txt`, `chat.txt`,
/// `transcript.txt` and `attachments.txt`.
pub struct FileDelivery {
    dir: PathBuf,
}

impl FileDelivery {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn summary_dir(&self, summary: &Summary) -> PathBuf {
        self.dir.join(&summary.invite_id)
    }

    async fn write(&self, summary: &Summary) -> Result<PathBuf> {
        let dir = self.summary_dir(summary);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create summary directory {:?}", dir))?;

        let header = format!(
            "Subject: {}\nTo: {}\n\n",
            summary.subject,
            summary.recipients.join(", ")
        );
        tokio::fs::write(dir.join("summary.txt"), header + &summary.body)
            .await
            .context("Failed to write summary")?;

        if summary.has_details() {
            tokio::fs::write(dir.join("chat.txt"), &summary.chat)
                .await
                .context("Failed to write chat")?;
            tokio::fs::write(dir.join("transcript.txt"), &summary.transcript)
                .await
                .context("Failed to write transcript")?;
            let links: String = summary
                .attachments
                .iter()
                .map(|(file_name, link)| format!("{}\t{}\n", file_name, link))
                .collect();
            tokio::fs::write(dir.join("attachments.txt"), links)
                .await
                .context("Failed to write attachment links")?;
        }
        Ok(dir)
    }
}

#[async_trait]
impl SummaryDelivery for FileDelivery {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn deliver(&self, summary: &Summary) -> Result<()> {
        let dir = self.write(summary).await?;
        info!("Summary written to {:?}", dir);
        Ok(())
    }
}

/// Pipes the summary body to a shell command, e.g. a mail sender.
/// - Files are written first, their directory is passed in the environment
/// - Non-zero exit fails the delivery
/// - The process is killed if the delivery is abandoned
pub struct CommandDelivery {
    command: String,
    sender: String,
    files: FileDelivery,
}

impl CommandDelivery {
    pub fn new(command: String, sender: String, dir: PathBuf) -> Self {
        Self {
            command,
            sender,
            files: FileDelivery::new(dir),
        }
    }
}

#[async_trait]
impl SummaryDelivery for CommandDelivery {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn deliver(&self, summary: &Summary) -> Result<()> {
        let dir = self.files.write(summary).await?;
        info!("Running delivery command: {}", self.command);

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env(delivery_env::INVITE_ID, &summary.invite_id)
            .env(delivery_env::SUBJECT, &summary.subject)
            .env(delivery_env::RECIPIENTS, summary.recipients.join(","))
            .env(delivery_env::SENDER, &self.sender)
            .env(delivery_env::SUMMARY_DIR, dir.to_string_lossy().as_ref())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start delivery command")?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            if let Err(e) = stdin.write_all(summary.body.as_bytes()).await {
                warn!("Delivery command closed stdin early: {}", e);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for delivery command")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Delivery command exited with status {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("Delivery command stdout: {}", stdout.trim());
        }
        Ok(())
    }
}

/// How long delivery may take before it is abandoned.
pub fn assembly_timeout(config: &DeliveryConfig) -> Duration {
    Duration::from_secs(config.assembly_timeout_secs)
}
