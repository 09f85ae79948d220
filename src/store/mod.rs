// src/store/mod.rs
//! Seen-Set Store: fingerprint → append-only set of processed identities.
//!
//! `merge` is a set union performed atomically per fingerprint by every
//! backend; callers never read-modify-write themselves.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PersistenceError;
use crate::fingerprint::Fingerprint;

pub use file::FileSeenStore;
pub use memory::MemorySeenStore;

/// Everything ever classified as processed for one fingerprint. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenSet {
    pub identities: BTreeSet<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SeenSet {
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains(identity)
    }

    /// Union `new` in. Returns how many identities were actually added.
    pub(crate) fn absorb(&mut self, new: &BTreeSet<String>, now: DateTime<Utc>) -> usize {
        let before = self.identities.len();
        self.identities.extend(new.iter().cloned());
        self.last_updated = Some(now);
        self.identities.len() - before
    }
}

#[async_trait]
pub trait SeenSetStore: Send + Sync {
    /// Unknown fingerprints yield an empty set, not an error.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<SeenSet, PersistenceError>;

    /// Atomic union of `identities` into the stored set. Empty input is a no-op.
    async fn merge(
        &self,
        fingerprint: &Fingerprint,
        identities: &BTreeSet<String>,
    ) -> Result<(), PersistenceError>;

    fn name(&self) -> &'static str;
}
