use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Operator credential for the mirror endpoint. Unset disables it.
    #[serde(default)]
    pub admin_key: Option<String>,
}

/// Longest accepted cold-start lookback (ten years).
pub const MAX_MINUTES_AGO: i64 = 60 * 24 * 365 * 10;
/// Longest accepted skew margin (one day).
pub const MAX_SKEW_MARGIN_SECS: i64 = 86_400;

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: u64,
    #[serde(default = "default_fast_interval_ms")]
    pub fast_interval_ms: u64,
    #[serde(default = "default_minutes_ago")]
    pub minutes_ago: i64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_skew_margin_secs")]
    pub skew_margin_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frequency_secs: default_frequency_secs(),
            fast_interval_ms: default_fast_interval_ms(),
            minutes_ago: default_minutes_ago(),
            page_size: default_page_size(),
            skew_margin_secs: default_skew_margin_secs(),
        }
    }
}

fn default_frequency_secs() -> u64 {
    10
}
fn default_fast_interval_ms() -> u64 {
    500
}
fn default_minutes_ago() -> i64 {
    10
}
fn default_page_size() -> usize {
    400
}
fn default_skew_margin_secs() -> i64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_mirror_capacity")]
    pub mirror_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mirror_capacity: default_mirror_capacity(),
        }
    }
}

fn default_mirror_capacity() -> usize {
    10
}

impl Config {
    /// Config with every optional section defaulted, for tests and tooling.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:11000".to_string(),
                admin_key: None,
            },
            scheduler: SchedulerConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.scheduler.page_size == 0 {
        anyhow::bail!("scheduler.page_size must be >= 1");
    }
    if config.scheduler.frequency_secs == 0 {
        anyhow::bail!("scheduler.frequency_secs must be >= 1");
    }
    if !(0..=MAX_MINUTES_AGO).contains(&config.scheduler.minutes_ago) {
        anyhow::bail!("scheduler.minutes_ago must be between 0 and {}", MAX_MINUTES_AGO);
    }
    if !(0..=MAX_SKEW_MARGIN_SECS).contains(&config.scheduler.skew_margin_secs) {
        anyhow::bail!(
            "scheduler.skew_margin_secs must be between 0 and {}",
            MAX_SKEW_MARGIN_SECS
        );
    }
    if config.ingest.mirror_capacity == 0 {
        anyhow::bail!("ingest.mirror_capacity must be >= 1");
    }
    if let Some(ref key) = config.server.admin_key {
        if key.trim().is_empty() {
            anyhow::bail!("server.admin_key must not be empty when set");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_sections_take_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "./data/evd.sqlite"

            [server]
            bind = "127.0.0.1:11000"
            "#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.scheduler.frequency_secs, 10);
        assert_eq!(config.scheduler.minutes_ago, 10);
        assert_eq!(config.scheduler.skew_margin_secs, 120);
        assert_eq!(config.ingest.mirror_capacity, 10);
        assert!(config.server.admin_key.is_none());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let mut config = Config::minimal("x.sqlite");
        config.scheduler.page_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn blank_admin_key_is_rejected() {
        let mut config = Config::minimal("x.sqlite");
        config.server.admin_key = Some("  ".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn lookback_must_stay_in_range() {
        let mut config = Config::minimal("x.sqlite");
        config.scheduler.minutes_ago = -1;
        assert!(validate(&config).is_err());
        config.scheduler.minutes_ago = MAX_MINUTES_AGO + 1;
        assert!(validate(&config).is_err());
        config.scheduler.minutes_ago = MAX_MINUTES_AGO;
        validate(&config).unwrap();
    }
}
