//! Stable keys for monitored search configurations.
//!
//! A fingerprint is the SHA-256 (hex) of the lower-cased query, location and
//! distance joined by the ASCII unit separator. The scoped form also mixes in
//! owner and task identity so that two users watching the same search keep
//! separate seen-sets.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::ConfigError;

/// Field delimiter. Inputs containing it are rejected.
pub const DELIMITER: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Search-only derivation. Shared by everyone watching the same search.
    pub fn coarse(query: &str, location: &str, distance: u32) -> Result<Self, ConfigError> {
        derive(query, location, distance, None, None)
    }

    /// Per-owner / per-task derivation. Use this whenever results are
    /// monitored on behalf of a user or a task.
    pub fn scoped(
        query: &str,
        location: &str,
        distance: u32,
        owner_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<Self, ConfigError> {
        derive(query, location, distance, owner_id, task_id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, enough for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn derive(
    query: &str,
    location: &str,
    distance: u32,
    owner_id: Option<&str>,
    task_id: Option<&str>,
) -> Result<Fingerprint, ConfigError> {
    let query = query.trim().to_lowercase();
    let location = location.trim();
    if query.is_empty() {
        return Err(ConfigError::EmptyQuery);
    }
    if location.is_empty() {
        return Err(ConfigError::EmptyLocation);
    }
    check_field("query", &query)?;
    check_field("location", location)?;

    let mut parts = vec![query, location.to_string(), distance.to_string()];
    // Labelled so that owner-only and task-only inputs never collide.
    if let Some(owner) = owner_id.filter(|s| !s.is_empty()) {
        check_field("owner_id", owner)?;
        parts.push(format!("owner={owner}"));
    }
    if let Some(task) = task_id.filter(|s| !s.is_empty()) {
        check_field("task_id", task)?;
        parts.push(format!("task={task}"));
    }

    let mut hasher = Sha256::new();
    hasher.update(parts.join(&DELIMITER.to_string()).as_bytes());
    Ok(Fingerprint(to_hex(&hasher.finalize())))
}

fn check_field(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.contains(DELIMITER) {
        return Err(ConfigError::ReservedCharacter { field });
    }
    Ok(())
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
