// src/store/file.rs
//! JSON file per fingerprint under a state directory.
//!
//! Merges take a per-fingerprint async lock for the whole read → union →
//! write sequence, and writes go through `<file>.tmp` + rename so a crash
//! mid-write leaves the previous record intact.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;

use super::{SeenSet, SeenSetStore};
use crate::error::PersistenceError;
use crate::fingerprint::Fingerprint;

pub struct FileSeenStore {
    dir: PathBuf,
    locks: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileSeenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fp: &Fingerprint) -> PathBuf {
        // Fingerprints are hex, safe as file names.
        self.dir.join(format!("{}.json", fp.as_str()))
    }

    fn lock_for(&self, fp: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(fp.clone()).or_default().clone()
    }

    async fn read(&self, fp: &Fingerprint) -> Result<SeenSet, PersistenceError> {
        let path = self.path_for(fp);
        match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s).map_err(|source| PersistenceError::Corrupt {
                fingerprint: fp.to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SeenSet::default()),
            Err(source) => Err(PersistenceError::Io {
                fingerprint: fp.to_string(),
                source,
            }),
        }
    }

    async fn write(&self, fp: &Fingerprint, set: &SeenSet) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            fingerprint: fp.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let path = self.path_for(fp);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(set).map_err(|source| PersistenceError::Corrupt {
            fingerprint: fp.to_string(),
            source,
        })?;
        fs::write(&tmp, json).await.map_err(io_err)?;
        fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl SeenSetStore for FileSeenStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<SeenSet, PersistenceError> {
        let lock = self.lock_for(fingerprint);
        let _guard = lock.lock().await;
        self.read(fingerprint).await
    }

    async fn merge(
        &self,
        fingerprint: &Fingerprint,
        identities: &BTreeSet<String>,
    ) -> Result<(), PersistenceError> {
        if identities.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(fingerprint);
        let _guard = lock.lock().await;

        let mut set = self.read(fingerprint).await?;
        let added = set.absorb(identities, chrono::Utc::now());
        self.write(fingerprint, &set).await?;
        tracing::debug!(
            target: "store",
            fp = fingerprint.short(),
            added,
            total = set.len(),
            "file merge"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(q: &str) -> Fingerprint {
        Fingerprint::coarse(q, "94105", 15).unwrap()
    }

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSeenStore::new(tmp.path().join("seen"));
        assert!(store.get(&fp("bike")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_persists_union_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("seen");
        {
            let store = FileSeenStore::new(&dir);
            store.merge(&fp("bike"), &set(&["x", "y"])).await.unwrap();
        }
        let store = FileSeenStore::new(&dir);
        store.merge(&fp("bike"), &set(&["y", "z"])).await.unwrap();
        let s = store.get(&fp("bike")).await.unwrap();
        assert_eq!(s.identities, set(&["x", "y", "z"]));
        assert!(!dir.join(format!("{}.json.tmp", fp("bike"))).exists());
    }

    #[tokio::test]
    async fn fingerprints_are_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSeenStore::new(tmp.path());
        store.merge(&fp("bike"), &set(&["a"])).await.unwrap();
        assert!(store.get(&fp("kayak")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_is_a_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileSeenStore::new(tmp.path());
        std::fs::write(tmp.path().join(format!("{}.json", fp("bike"))), "not json").unwrap();
        let err = store.get(&fp("bike")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn concurrent_merges_on_one_fingerprint_keep_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FileSeenStore::new(tmp.path()));
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.spawn(async move {
                let id = format!("id-{i}");
                store.merge(&fp("bike"), &set(&[id.as_str()])).await.unwrap();
            });
        }
        while tasks.join_next().await.is_some() {}
        assert_eq!(store.get(&fp("bike")).await.unwrap().len(), 16);
    }
}
