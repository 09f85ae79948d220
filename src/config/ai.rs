// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_concurrency() -> usize {
    crate::evaluate::DEFAULT_SCORER_CONCURRENCY
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    pub enabled: bool,
    /// Only "openai" is wired up (case-insensitive).
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    /// Turn the user's request into search keywords before building the URL.
    #[serde(default = "default_true")]
    pub refine_queries: bool,
    /// Scorer requests in flight per run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "openai".to_string(),
            model: default_model(),
            api_key: String::new(),
            refine_queries: true,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AiConfig = serde_json::from_str(&data)?;

        cfg.provider = cfg.provider.to_lowercase();

        if cfg.api_key.trim().eq_ignore_ascii_case("env") || (cfg.enabled && cfg.api_key.is_empty()) {
            cfg.api_key = match cfg.provider.as_str() {
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }
        Ok(cfg)
    }

    /// Missing file → disabled config. A present but broken file is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no AI config, evaluation disabled");
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }
}
