// src/config/regions.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

const EMBEDDED: &str = include_str!("../../config/regions.toml");

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegionRange {
    pub start: u32,
    pub end: u32,
    pub region: String,
}

/// Postal code → Craigslist region. Plain data, loaded from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegionTable {
    pub default: String,
    #[serde(default)]
    pub ranges: Vec<RegionRange>,
}

impl Default for RegionTable {
    /// The table shipped in `config/regions.toml`.
    fn default() -> Self {
        Self::parse(EMBEDDED).unwrap_or_else(|_| Self {
            default: "sfbay".to_string(),
            ranges: Vec::new(),
        })
    }
}

impl RegionTable {
    pub fn parse(s: &str) -> Result<Self> {
        let t: RegionTable = toml::from_str(s).context("parsing region table")?;
        if t.default.trim().is_empty() {
            return Err(anyhow!("region table needs a non-empty `default`"));
        }
        if let Some(bad) = t.ranges.iter().find(|r| r.start > r.end) {
            return Err(anyhow!("region range {}..{} is inverted", bad.start, bad.end));
        }
        Ok(t)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading region table from {}", path.display()))?;
        Self::parse(&s)
    }

    /// Region for a postal code. Non-numeric or unmapped → default.
    pub fn region_for(&self, postal: &str) -> &str {
        let Ok(code) = postal.trim().parse::<u32>() else {
            tracing::warn!(postal, default = %self.default, "invalid postal code, using default region");
            return &self.default;
        };
        match self.ranges.iter().find(|r| (r.start..=r.end).contains(&code)) {
            Some(r) => &r.region,
            None => {
                tracing::warn!(postal, default = %self.default, "postal code not mapped, using default region");
                &self.default
            }
        }
    }
}
