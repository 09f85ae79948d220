// src/config/watch.rs
//! One monitored search. `WatchSpec` is what arrives from a file or an HTTP
//! body; `WatchConfig` is the validated value the pipeline runs on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crawl::{ModeOverride, DEFAULT_INITIAL_LIMIT};
use crate::error::ConfigError;
use crate::evaluate::ThresholdLevel;
use crate::fingerprint::Fingerprint;

pub const MAX_INITIAL_LIMIT: usize = 50;

/// Miles, as a number or a numeric string ("15").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Distance {
    Miles(u32),
    Text(String),
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distance::Miles(m) => write!(f, "{m}"),
            Distance::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSpec {
    #[serde(default)]
    pub label: Option<String>,
    pub query: String,
    #[serde(alias = "zip_code")]
    pub location: String,
    pub distance: Distance,
    #[serde(default)]
    pub threshold: Option<String>,
    #[serde(default)]
    pub initial_limit: Option<usize>,
    #[serde(default)]
    pub seed_only: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    /// Free-text requirements for the scorer; the query when absent.
    #[serde(default)]
    pub criteria: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchConfig {
    pub label: String,
    pub query: String,
    pub location: String,
    pub distance: u32,
    pub threshold: ThresholdLevel,
    pub initial_limit: usize,
    /// Mark the newest listing seen instead of bootstrapping. Only applies
    /// while the seen-set is empty.
    pub seed_only: bool,
    pub mode: ModeOverride,
    pub owner_id: Option<String>,
    pub task_id: Option<String>,
    pub criteria: String,
}

impl WatchConfig {
    /// Scoped whenever an owner or task is attached, coarse otherwise.
    pub fn fingerprint(&self) -> Result<Fingerprint, ConfigError> {
        if self.owner_id.is_some() || self.task_id.is_some() {
            Fingerprint::scoped(
                &self.query,
                &self.location,
                self.distance,
                self.owner_id.as_deref(),
                self.task_id.as_deref(),
            )
        } else {
            Fingerprint::coarse(&self.query, &self.location, self.distance)
        }
    }
}

impl TryFrom<WatchSpec> for WatchConfig {
    type Error = ConfigError;

    fn try_from(spec: WatchSpec) -> Result<Self, Self::Error> {
        let query = spec.query.trim().to_string();
        let location = spec.location.trim().to_string();
        if query.is_empty() {
            return Err(ConfigError::EmptyQuery);
        }
        if location.is_empty() {
            return Err(ConfigError::EmptyLocation);
        }

        let distance = match &spec.distance {
            Distance::Miles(m) => *m,
            Distance::Text(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidDistance(s.clone()))?,
        };

        let threshold = match spec.threshold.as_deref() {
            None => ThresholdLevel::default(),
            Some(s) => s.parse()?,
        };

        let initial_limit = spec.initial_limit.unwrap_or(DEFAULT_INITIAL_LIMIT);
        if !(1..=MAX_INITIAL_LIMIT).contains(&initial_limit) {
            return Err(ConfigError::InvalidLimit {
                got: initial_limit,
                max: MAX_INITIAL_LIMIT,
            });
        }

        let mode = match spec.mode.as_deref() {
            None => ModeOverride::Auto,
            Some(s) => s.parse()?,
        };

        let non_empty = |o: Option<String>| o.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let criteria = non_empty(spec.criteria).unwrap_or_else(|| query.clone());
        let label = non_empty(spec.label).unwrap_or_else(|| format!("{query} @ {location}"));

        let cfg = WatchConfig {
            label,
            query,
            location,
            distance,
            threshold,
            initial_limit,
            seed_only: spec.seed_only,
            mode,
            owner_id: non_empty(spec.owner_id),
            task_id: non_empty(spec.task_id),
            criteria,
        };
        // Surfaces reserved-character input before anything runs.
        cfg.fingerprint()?;
        Ok(cfg)
    }
}
