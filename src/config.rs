use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that supplies the bot token when the config file leaves it empty
pub const ENV_BOT_TOKEN: &str = "SLACK_BOT_TOKEN";

/// Environment variable that supplies the app-level token when the config file leaves it empty
pub const ENV_APP_TOKEN: &str = "SLACK_APP_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`) used for Web API lookups
    #[serde(default)]
    pub bot_token: String,
    /// App-level token (`xapp-...`) used to open socket mode connections
    #[serde(default)]
    pub app_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    /// Upper bound on a single directory lookup
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    /// Capacity of the classified message and error channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecorderConfig {
    /// SQLite database classified messages are written to. Log only when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_resolve_timeout_secs() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    16
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            app_token: String::new(),
            api_base: default_api_base(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_secs: default_resolve_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults if it does not exist.
    /// Tokens missing from the file are taken from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?
        } else {
            String::new()
        };

        Self::from_parts(&content, |key| std::env::var(key).ok())
    }

    fn from_parts(content: &str, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).context("Failed to parse config file")?;

        fill_from_env(&mut config.slack.bot_token, ENV_BOT_TOKEN, &env)?;
        fill_from_env(&mut config.slack.app_token, ENV_APP_TOKEN, &env)?;

        Ok(config)
    }
}

fn fill_from_env(
    value: &mut String,
    key: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if value.trim().is_empty() {
        *value = env(key).map(|v| v.trim().to_string()).unwrap_or_default();
    }
    if value.is_empty() {
        bail!(
            "Slack token missing: set it in the config file or the \"{}\" environment variable",
            key
        );
    }
    Ok(())
}
