use crate::global;
use crate::scheduler::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scribe: ScribeConfig,
    pub scheduler: SchedulerConfig,
    pub browser: BrowserConfig,
    pub transcription: TranscriptionConfig,
    pub delivery: DeliveryConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    /// Seed for the bot display name. The bot joins as `Scribe [<name>]`.
    pub name: String,
    /// How long to wait in the lobby for admission (default: 5 minutes)
    pub waiting_timeout_ms: u64,
    /// Hard cap on time spent in a meeting (default: 6 hours)
    pub meeting_timeout_ms: u64,
    /// Seconds subtracted from the meeting time so the bot joins early
    pub lead_time_secs: u64,
    /// Pause after admission before the introduction is sent
    pub admission_settle_ms: u64,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            name: "Scribe".to_string(),
            waiting_timeout_ms: 300_000,
            meeting_timeout_ms: 21_600_000,
            lead_time_secs: 10,
            admission_settle_ms: 1_000,
        }
    }
}

impl ScribeConfig {
    pub fn waiting_timeout(&self) -> Duration {
        Duration::from_millis(self.waiting_timeout_ms)
    }

    pub fn meeting_timeout(&self) -> Duration {
        Duration::from_millis(self.meeting_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    /// How often the local dispatcher looks for due entries
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// WebDriver endpoint (chromedriver, geckodriver, selenium)
    pub webdriver_url: String,
    pub headless: bool,
    /// Default wait for an element to become available
    pub element_timeout_ms: u64,
    /// How often observers poll the page for changes
    pub observer_poll_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            headless: true,
            element_timeout_ms: 20_000,
            observer_poll_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// `none` or `command`
    pub provider: String,
    /// Streaming speech-to-text command. Must print one JSON result per line.
    pub command: String,
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            command: String::new(),
            language: "en-US".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// `file` or `command`
    pub mode: String,
    /// Shell command receiving the summary body on stdin.
    /// Env vars: SCRIBE_INVITE_ID, SCRIBE_SUBJECT, SCRIBE_RECIPIENTS,
    /// SCRIBE_SENDER, SCRIBE_SUMMARY_DIR
    pub command: String,
    pub sender: String,
    /// Upper bound on assembling and delivering the summary
    pub assembly_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: "file".to_string(),
            command: String::new(),
            sender: "scribe@localhost".to_string(),
            assembly_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3838,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
