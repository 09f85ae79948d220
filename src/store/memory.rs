// src/store/memory.rs
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

use super::{SeenSet, SeenSetStore};
use crate::error::PersistenceError;
use crate::fingerprint::Fingerprint;

/// Process-local store. The whole map sits behind one lock, so every merge is
/// a single critical section.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    inner: Mutex<HashMap<Fingerprint, SeenSet>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fingerprints tracked.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl SeenSetStore for MemorySeenStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<SeenSet, PersistenceError> {
        Ok(self
            .inner
            .lock()
            .await
            .get(fingerprint)
            .cloned()
            .unwrap_or_default())
    }

    async fn merge(
        &self,
        fingerprint: &Fingerprint,
        identities: &BTreeSet<String>,
    ) -> Result<(), PersistenceError> {
        if identities.is_empty() {
            return Ok(());
        }
        let mut map = self.inner.lock().await;
        let added = map
            .entry(fingerprint.clone())
            .or_default()
            .absorb(identities, chrono::Utc::now());
        tracing::debug!(target: "store", fp = fingerprint.short(), added, "memory merge");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
