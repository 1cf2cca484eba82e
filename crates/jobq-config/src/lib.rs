//! Typed, JSON-persisted settings for jobq.
//!
//! Config is read-mostly process-wide state: [`ConfigStore::load`] reads the
//! file if present and fills in [`Config::default`] for anything missing;
//! [`ConfigStore::save`] writes it back. A running worker pool snapshots an
//! `Arc<Config>` once at startup — `config set` never propagates to a pool
//! that's already running, matching the single-node process model.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// User-scoped path the CLI uses by default: `$XDG_CONFIG_HOME/jobq/config.json`,
/// falling back to `~/.config/jobq/config.json`.
pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("jobq").join("config.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("jobq").join("config.json")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_retries: u32,
    pub backoff_base: f64,
    pub database_url: Option<String>,
    pub worker_poll_interval: f64,
    pub job_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 3,
            backoff_base: 2.0,
            database_url: None,
            worker_poll_interval: 1.0,
            job_timeout: 300,
        }
    }
}

impl Config {
    /// Look up a setting by its `config get KEY` name.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "max_retries" => Some(self.max_retries.to_string()),
            "backoff_base" => Some(self.backoff_base.to_string()),
            "database_url" => self.database_url.clone(),
            "worker_poll_interval" => Some(self.worker_poll_interval.to_string()),
            "job_timeout" => Some(self.job_timeout.to_string()),
            _ => None,
        }
    }

    /// Apply a `config set KEY VALUE`. Unknown keys and unparsable values
    /// are reported as errors rather than silently ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "max_retries" => self.max_retries = value.parse().context("max_retries must be a non-negative integer")?,
            "backoff_base" => self.backoff_base = value.parse().context("backoff_base must be a number")?,
            "database_url" => self.database_url = Some(value.to_string()),
            "worker_poll_interval" => {
                self.worker_poll_interval = value.parse().context("worker_poll_interval must be a number")?
            }
            "job_timeout" => self.job_timeout = value.parse().context("job_timeout must be a non-negative integer")?,
            other => anyhow::bail!("unknown config key: {other}"),
        }
        Ok(())
    }

    pub fn all(&self) -> Vec<(&'static str, String)> {
        vec![
            ("max_retries", self.max_retries.to_string()),
            ("backoff_base", self.backoff_base.to_string()),
            (
                "database_url",
                self.database_url.clone().unwrap_or_default(),
            ),
            ("worker_poll_interval", self.worker_poll_interval.to_string()),
            ("job_timeout", self.job_timeout.to_string()),
        ]
    }
}

/// Loads and saves a [`Config`] at a fixed path on disk.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub fn at_default_path() -> Self {
        ConfigStore::new(default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the config file if it exists; missing keys fall back to
    /// [`Config::default`]. A missing file is not an error — it returns
    /// plain defaults.
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading config file {}", self.path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", self.path.display()))?;
        Ok(config)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, serialized)
            .with_context(|| format!("writing config file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        assert_eq!(store.load().unwrap(), Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("config.json"));
        let mut config = Config::default();
        config.max_retries = 7;
        config.database_url = Some("postgres://localhost/jobq".into());
        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"max_retries": 9}"#).unwrap();
        let store = ConfigStore::new(path);
        let config = store.load().unwrap();
        assert_eq!(config.max_retries, 9);
        assert_eq!(config.backoff_base, Config::default().backoff_base);
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut config = Config::default();
        assert!(config.set("not_a_real_key", "1").is_err());
    }

    #[test]
    fn set_and_get_round_trip() {
        let mut config = Config::default();
        config.set("max_retries", "9").unwrap();
        assert_eq!(config.get("max_retries").as_deref(), Some("9"));
    }
}
