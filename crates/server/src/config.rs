use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    /// PNG served for every completed job. Without it the PNG endpoint
    /// answers 404, like a backend missing its renderer.
    pub png_path: Option<PathBuf>,
    pub step_delay_ms: u64,
    pub max_upload_bytes: usize,
    /// Jobs idle longer than this are forgotten. 0 keeps them forever.
    pub job_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8000".into(),
            png_path: None,
            step_delay_ms: 700,
            max_upload_bytes: 10 * 1024 * 1024,
            job_ttl_secs: 3600,
        }
    }
}

impl Settings {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn job_ttl(&self) -> Option<Duration> {
        (self.job_ttl_secs > 0).then(|| Duration::from_secs(self.job_ttl_secs))
    }
}

pub fn load_settings() -> Settings {
    let file_cfg = fs::read_to_string("server.toml")
        .ok()
        .and_then(|raw| toml::from_str::<toml::Table>(&raw).ok())
        .map(flatten_table)
        .unwrap_or_default();
    settings_from(&file_cfg, |key| std::env::var(key).ok())
}

/// Top-level keys only; numbers may be written bare or quoted.
fn flatten_table(table: toml::Table) -> HashMap<String, String> {
    table
        .into_iter()
        .map(|(key, value)| match value {
            toml::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect()
}

pub(crate) fn settings_from(
    file_cfg: &HashMap<String, String>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("png_path") {
        settings.png_path = Some(PathBuf::from(v));
    }
    if let Some(v) = file_cfg.get("step_delay_ms").and_then(|v| v.parse().ok()) {
        settings.step_delay_ms = v;
    }
    if let Some(v) = file_cfg.get("max_upload_bytes").and_then(|v| v.parse().ok()) {
        settings.max_upload_bytes = v;
    }
    if let Some(v) = file_cfg.get("job_ttl_secs").and_then(|v| v.parse().ok()) {
        settings.job_ttl_secs = v;
    }

    if let Some(v) = env("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = env("APP__PNG_PATH") {
        settings.png_path = (!v.trim().is_empty()).then(|| PathBuf::from(v));
    }

    if let Some(v) = env("APP__STEP_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.step_delay_ms = v;
    }
    if let Some(v) = env("APP__MAX_UPLOAD_BYTES").and_then(|v| v.parse().ok()) {
        settings.max_upload_bytes = v;
    }
    if let Some(v) = env("APP__JOB_TTL_SECS").and_then(|v| v.parse().ok()) {
        settings.job_ttl_secs = v;
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
