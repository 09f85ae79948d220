// src/config/app.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::watch::{WatchConfig, WatchSpec};
use crate::crawl::DEFAULT_SCAN_CAP;
use crate::error::ConfigError;
use crate::evaluate::ThresholdTable;

pub const ENV_CONFIG_PATH: &str = "SENTINEL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/sentinel.toml";

/// Process-wide settings. File values first, then env overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub state_dir: PathBuf,
    pub discord_webhook: Option<String>,
    pub poll_interval: Duration,
    pub run_deadline: Duration,
    pub scan_cap: usize,
    pub thresholds: ThresholdTable,
    /// `None` → the embedded region table.
    pub regions_path: Option<PathBuf>,
    pub ai_config_path: PathBuf,
    pub watches: Vec<WatchSpec>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state/seen"),
            discord_webhook: None,
            poll_interval: Duration::from_secs(900),
            run_deadline: Duration::from_secs(300),
            scan_cap: DEFAULT_SCAN_CAP,
            thresholds: ThresholdTable::default(),
            regions_path: None,
            ai_config_path: PathBuf::from("config/ai.json"),
            watches: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    state_dir: Option<PathBuf>,
    discord_webhook_url: Option<String>,
    poll_interval_secs: Option<u64>,
    run_deadline_secs: Option<u64>,
    scan_cap: Option<usize>,
    thresholds: Option<ThresholdTable>,
    regions_path: Option<PathBuf>,
    ai_config_path: Option<PathBuf>,
    #[serde(rename = "watch")]
    watches: Vec<WatchSpec>,
}

impl AppConfig {
    /// Lookup order:
    /// 1) $SENTINEL_CONFIG_PATH (must exist)
    /// 2) config/sentinel.toml
    /// 3) built-in defaults, no watches
    ///
    /// Env overrides are applied on top in every case.
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        base.with_env_overrides()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let f: FileConfig = toml::from_str(s)?;
        let d = Self::default();
        let cfg = Self {
            state_dir: f.state_dir.unwrap_or(d.state_dir),
            discord_webhook: f.discord_webhook_url.filter(|s| !s.trim().is_empty()),
            poll_interval: f.poll_interval_secs.map(Duration::from_secs).unwrap_or(d.poll_interval),
            run_deadline: f.run_deadline_secs.map(Duration::from_secs).unwrap_or(d.run_deadline),
            scan_cap: f.scan_cap.unwrap_or(d.scan_cap),
            thresholds: f.thresholds.unwrap_or(d.thresholds),
            regions_path: f.regions_path,
            ai_config_path: f.ai_config_path.unwrap_or(d.ai_config_path),
            watches: f.watches,
        };
        cfg.thresholds.validate()?;
        Ok(cfg)
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(dir) = env_str("SENTINEL_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = env_str("DISCORD_WEBHOOK_URL") {
            self.discord_webhook = Some(url);
        }
        if let Some(secs) = env_parse::<u64>("POLL_INTERVAL_SECS")? {
            self.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_parse::<u64>("RUN_DEADLINE_SECS")? {
            self.run_deadline = Duration::from_secs(secs.max(1));
        }
        if let Some(cap) = env_parse::<usize>("SCAN_CAP")? {
            self.scan_cap = cap.max(1);
        }
        Ok(self)
    }

    /// Validate every configured watch. The first invalid one fails the lot.
    pub fn watch_configs(&self) -> Result<Vec<WatchConfig>, ConfigError> {
        self.watches.iter().cloned().map(WatchConfig::try_from).collect()
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_str(key) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{key} must be a number, got {v:?}")),
    }
}
