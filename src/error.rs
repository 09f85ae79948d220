//! Error taxonomy for a polling run.
//!
//! Per-item errors (`FetchError`, `ScorerError`) are recovered where they
//! happen: the item is skipped or scored neutrally and the run goes on.
//! `ConfigError` and `PersistenceError` are fatal and surface as `RunError`,
//! so a caller can tell "nothing new" apart from "could not determine".

use thiserror::Error;

/// Transport or parsing failure while fetching a result page or one listing.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("could not parse {what} from {url}")]
    Parse { url: String, what: &'static str },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("fetch failed: {0}")]
    Other(String),
}

/// Evaluator failure for one listing. Never aborts a run.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("scorer transport error: {0}")]
    Transport(String),

    #[error("scorer returned malformed output: {0}")]
    Malformed(String),

    #[error("scorer unavailable")]
    Unavailable,
}

/// Seen-set read or write failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("seen-set I/O error for {fingerprint}: {source}")]
    Io {
        fingerprint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt seen-set record for {fingerprint}: {source}")]
    Corrupt {
        fingerprint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("seen-set backend error: {0}")]
    Backend(String),
}

/// Invalid configuration, rejected before any fetch is issued.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("search query must not be empty")]
    EmptyQuery,

    #[error("location must not be empty")]
    EmptyLocation,

    #[error("distance must be a whole number of miles, got {0:?}")]
    InvalidDistance(String),

    #[error("unknown threshold level {0:?}")]
    UnknownThreshold(String),

    #[error("threshold {name} = {value} is outside [0, 1]")]
    ThresholdOutOfRange { name: String, value: f32 },

    #[error("initial-run limit must be between 1 and {max}, got {got}")]
    InvalidLimit { got: usize, max: usize },

    #[error("unknown crawl mode {0:?}")]
    UnknownMode(String),

    #[error("field {field} contains a reserved control character")]
    ReservedCharacter { field: &'static str },
}

/// Fatal outcome of a run. Nothing was marked seen.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    #[error("seen-set unavailable: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("a run for fingerprint {0} is already in flight")]
    Busy(String),
}

impl RunError {
    /// Short machine-friendly kind, used in logs and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Config(_) => "config",
            RunError::Persistence(_) => "persistence",
            RunError::Busy(_) => "busy",
        }
    }
}
