//! Configuration management for settle.
//!
//! Loads configuration from ${SETTLE_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Channel grouping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Gap (seconds) between consecutive messages that splits two groups.
    pub time_gap_secs: u64,
    /// Quiet period after the last message before a channel is flushed.
    pub wait_minutes: u64,
    /// Finalized groups smaller than this are discarded.
    pub min_group_size: usize,
    /// Messages older than this on arrival are dropped (0 disables).
    pub max_event_age_secs: u64,
    /// When false, channels are only partitioned on a forced flush.
    pub auto_flush: bool,
}

impl GroupingConfig {
    pub fn time_gap(&self) -> f64 {
        self.time_gap_secs as f64
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_secs(self.wait_minutes.saturating_mul(60))
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            time_gap_secs: 300,
            wait_minutes: 5,
            min_group_size: 2,
            max_event_age_secs: 0,
            auto_flush: true,
        }
    }
}

/// Thread stabilization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Replies (excluding the parent) required before a thread is analyzed.
    pub min_replies: usize,
    /// Quiet period after the last reply before the count is checked.
    pub wait_minutes: u64,
}

impl ThreadConfig {
    pub fn analysis_delay(&self) -> Duration {
        Duration::from_secs(self.wait_minutes.saturating_mul(60))
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            min_replies: 5,
            wait_minutes: 30,
        }
    }
}

/// Slack app credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) for Web API calls.
    pub bot_token: Option<String>,
    /// App-level token (`xapp-...`) for Socket Mode.
    pub app_token: Option<String>,
    pub api_base: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            app_token: None,
            api_base: Config::DEFAULT_SLACK_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Override for the Generative Language API base URL.
    pub base_url: Option<String>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: Config::DEFAULT_SUMMARIZER_MODEL.to_string(),
            base_url: None,
        }
    }
}

/// Notion export. Disabled unless both values resolve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotionConfig {
    pub api_key: Option<String>,
    pub database_id: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `SETTLE_LOG` is unset.
    pub level: String,
    /// Also write a daily-rotated log file.
    pub file: bool,
    /// Log directory (defaults to `$SETTLE_HOME/logs`).
    pub dir: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn effective_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(paths::logs_dir)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
            dir: None,
        }
    }
}

pub mod paths {
    //! Path resolution for settle configuration and data directories.
    //!
    //! SETTLE_HOME resolution order:
    //! 1. SETTLE_HOME environment variable (if set)
    //! 2. ~/.config/settle (default)

    use std::path::PathBuf;

    /// Returns the settle home directory.
    pub fn settle_home() -> PathBuf {
        if let Ok(home) = std::env::var("SETTLE_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("settle"))
            .unwrap_or_else(|| PathBuf::from(".settle"))
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        settle_home().join("config.toml")
    }

    pub fn logs_dir() -> PathBuf {
        settle_home().join("logs")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grouping: GroupingConfig,
    pub threads: ThreadConfig,
    pub slack: SlackConfig,
    pub summarizer: SummarizerConfig,
    pub notion: NotionConfig,
    pub logging: LoggingConfig,
}

const REDACTED: &str = "<redacted>";

impl Config {
    pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
    pub const DEFAULT_SUMMARIZER_MODEL: &str = "gemini-2.0-flash";

    /// Loads configuration from the default config path.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        } else {
            Config::default()
        };
        config
            .validate()
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        Ok(config)
    }

    /// Rejects values that parse but make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.grouping.min_group_size == 0 {
            anyhow::bail!("grouping.min_group_size must be at least 1");
        }
        Ok(())
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Copy of the config with every credential replaced by a placeholder.
    pub fn redacted(&self) -> Self {
        fn mask(value: &Option<String>) -> Option<String> {
            value.as_ref().map(|_| REDACTED.to_string())
        }

        let mut config = self.clone();
        config.slack.bot_token = mask(&self.slack.bot_token);
        config.slack.app_token = mask(&self.slack.app_token);
        config.summarizer.api_key = mask(&self.summarizer.api_key);
        config.notion.api_key = mask(&self.notion.api_key);
        config
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

/// Resolves a secret from config first, then the named environment variable.
///
/// Blank values count as unset.
pub fn resolve_secret(configured: Option<&str>, env_var: &str) -> Option<String> {
    configured
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            std::env::var(env_var)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
}

fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}
