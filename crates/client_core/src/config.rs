use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::{notify::DEFAULT_TOAST_TTL, poller::DEFAULT_POLL_INTERVAL, PollSettings};

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub poll_interval: Duration,
    pub max_poll_duration: Option<Duration>,
    pub toast_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_duration: None,
            toast_ttl: DEFAULT_TOAST_TTL,
        }
    }
}

impl ClientConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            max_duration: self.max_poll_duration,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_url: Option<String>,
    poll_interval_ms: Option<u64>,
    max_poll_secs: Option<u64>,
    toast_ttl_ms: Option<u64>,
}

/// Defaults, then the TOML file, then environment variables.
///
/// An explicitly named file must exist; the default `client.toml` is optional.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::default();

    let raw = match path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).ok(),
    };
    if let Some(raw) = raw {
        let file_cfg: FileConfig = toml::from_str(&raw).context("invalid client config")?;
        apply_file(&mut config, file_cfg);
    }

    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_file(config: &mut ClientConfig, file_cfg: FileConfig) {
    if let Some(v) = file_cfg.server_url {
        config.server_url = v;
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        config.poll_interval = Duration::from_millis(v.max(1));
    }
    if let Some(v) = file_cfg.max_poll_secs {
        config.max_poll_duration = limit_from_secs(v);
    }
    if let Some(v) = file_cfg.toast_ttl_ms {
        config.toast_ttl = Duration::from_millis(v);
    }
}

pub(crate) fn apply_env(config: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("DIAGRAM_SERVER_URL") {
        config.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        config.server_url = v;
    }

    if let Some(v) = lookup("APP__POLL_INTERVAL_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.poll_interval = Duration::from_millis(v.max(1));
    }
    if let Some(v) = lookup("APP__MAX_POLL_SECS").and_then(|v| v.parse::<u64>().ok()) {
        config.max_poll_duration = limit_from_secs(v);
    }
    if let Some(v) = lookup("APP__TOAST_TTL_MS").and_then(|v| v.parse::<u64>().ok()) {
        config.toast_ttl = Duration::from_millis(v);
    }
}

/// Zero means "no limit".
pub fn limit_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
