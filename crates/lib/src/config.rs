//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.slackline/config.json`) and environment.
//! Secrets are normally supplied through the environment (SLACK_BOT_TOKEN, SLACK_APP_TOKEN).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Slack app credentials and channel filtering.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Agent pipeline settings (model, Ollama endpoint, bundle path).
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Daemon lifecycle settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Slack app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Bot token (`xoxb-...`). Overridden by SLACK_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// App-level token with `connections:write` (`xapp-...`). Overridden by SLACK_APP_TOKEN env.
    pub app_token: Option<String>,
    /// Channel ids the bot answers in. Empty means every channel the bot can see.
    #[serde(default)]
    pub allowed_channels: Vec<String>,
    /// Reply in a thread under the triggering message (default true).
    #[serde(default = "default_true")]
    pub thread_replies: bool,
    /// Reaction added to the triggering message while a turn runs. Empty string disables it.
    #[serde(default = "default_working_reaction")]
    pub working_reaction: String,
    /// Post a transient status message in the reply thread while a turn runs (default true).
    #[serde(default = "default_true")]
    pub status_messages: bool,
}

fn default_true() -> bool {
    true
}

fn default_working_reaction() -> String {
    "hourglass_flowing_sand".to_string()
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            app_token: None,
            allowed_channels: Vec::new(),
            thread_replies: default_true(),
            working_reaction: default_working_reaction(),
            status_messages: default_true(),
        }
    }
}

/// Agent defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsConfig {
    /// Model name as shown by `ollama list`. The bundle's model wins when both are set.
    pub model: Option<String>,
    /// Ollama base URL (default http://127.0.0.1:11434).
    pub ollama_base_url: Option<String>,
    /// Bundle file (default: `bundle.md` next to the config file). Overridden by SLACKLINE_BUNDLE env.
    pub bundle: Option<PathBuf>,
}

/// Daemon lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Seconds in-flight turns get to finish on shutdown before they are abandoned.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Pending events buffered per channel session.
    #[serde(default = "default_session_queue_depth")]
    pub session_queue_depth: usize,
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_session_queue_depth() -> usize {
    32
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_shutdown_grace_secs(),
            session_queue_depth: default_session_queue_depth(),
        }
    }
}

impl DaemonConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Trimmed, non-empty value of an env var.
fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the bot token: env SLACK_BOT_TOKEN overrides config.
pub fn resolve_bot_token(config: &Config) -> Option<String> {
    env_non_empty("SLACK_BOT_TOKEN").or_else(|| config_non_empty(&config.slack.bot_token))
}

/// Resolve the app-level token: env SLACK_APP_TOKEN overrides config.
pub fn resolve_app_token(config: &Config) -> Option<String> {
    env_non_empty("SLACK_APP_TOKEN").or_else(|| config_non_empty(&config.slack.app_token))
}

/// Resolve the channel allow-list. A CLI `--channel` wins, then SLACK_CHANNEL_ID, then config.
/// `None` means every channel is allowed.
pub fn resolve_allowed_channels(config: &Config, cli_channel: Option<&str>) -> Option<Vec<String>> {
    let single = cli_channel
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .or_else(|| env_non_empty("SLACK_CHANNEL_ID"));
    if let Some(c) = single {
        return Some(vec![c]);
    }
    let list: Vec<String> = config
        .slack
        .allowed_channels
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SLACKLINE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".slackline").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Resolve the bundle file: CLI flag, then SLACKLINE_BUNDLE, then `agents.bundle`
/// (relative paths resolved against the config file's parent), then `bundle.md` next to the config.
pub fn resolve_bundle_path(config: &Config, config_path: &Path, cli_bundle: Option<&Path>) -> PathBuf {
    if let Some(p) = cli_bundle {
        return p.to_path_buf();
    }
    if let Some(p) = env_non_empty("SLACKLINE_BUNDLE") {
        return PathBuf::from(p);
    }
    match &config.agents.bundle {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent(config_path).join(p)
            }
        }
        _ => config_parent(config_path).join("bundle.md"),
    }
}

/// Load config from the given path or the default (SLACKLINE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
