// src/lease.rs
//! At most one run in flight per fingerprint.
//!
//! `try_acquire` hands out a guard; dropping it releases the lease, so every
//! exit path of a run (early return, `?`, panic unwinding, task abort) frees it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Default)]
pub struct RunLeases {
    held: Arc<Mutex<HashSet<Fingerprint>>>,
}

impl RunLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another run already holds this fingerprint.
    pub fn try_acquire(&self, fingerprint: &Fingerprint) -> Option<LeaseGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(fingerprint.clone()) {
            return None;
        }
        Some(LeaseGuard {
            fingerprint: fingerprint.clone(),
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, fingerprint: &Fingerprint) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(fingerprint)
    }
}

#[derive(Debug)]
pub struct LeaseGuard {
    fingerprint: Fingerprint,
    held: Arc<Mutex<HashSet<Fingerprint>>>,
}

impl LeaseGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(q: &str) -> Fingerprint {
        Fingerprint::coarse(q, "94105", 15).unwrap()
    }

    #[test]
    fn second_acquire_fails_until_release() {
        let leases = RunLeases::new();
        let g = leases.try_acquire(&fp("bike")).expect("first lease");
        assert!(leases.try_acquire(&fp("bike")).is_none());
        assert!(leases.is_held(&fp("bike")));
        drop(g);
        assert!(!leases.is_held(&fp("bike")));
        assert!(leases.try_acquire(&fp("bike")).is_some());
    }

    #[test]
    fn different_fingerprints_do_not_block() {
        let leases = RunLeases::new();
        let _a = leases.try_acquire(&fp("bike")).unwrap();
        assert!(leases.try_acquire(&fp("kayak")).is_some());
    }

    #[tokio::test]
    async fn lease_released_when_task_is_aborted() {
        let leases = RunLeases::new();
        let l2 = leases.clone();
        let handle = tokio::spawn(async move {
            let _g = l2.try_acquire(&fp("bike")).unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.abort();
        let _ = handle.await;
        assert!(!leases.is_held(&fp("bike")));
    }
}
