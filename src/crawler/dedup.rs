//! Dedup gate
//!
//! In-memory record of everything already known this run (and, for deals, in earlier
//! runs). Two key spaces live behind a single lock:
//! - page keys, claimed when a target is dispatched so no URL is fetched twice
//! - record keys, seeded from the store at startup and claimed at ingestion
//!
//! Check-then-mark is always one critical section.

use crate::storage::{lock_storage, SharedStorage};
use crate::url::canonical_key_str;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct GateSets {
    pages: HashSet<String>,
    records: HashSet<String>,
}

/// Concurrency-safe set of known page and record keys
#[derive(Debug, Default)]
pub struct DedupGate {
    inner: Mutex<GateSets>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the record space from the store
    ///
    /// A failed load is logged and leaves the gate empty; the store's own unique
    /// constraints still prevent duplicate rows.
    ///
    /// # Returns
    ///
    /// The number of keys loaded
    pub fn seed_from_store(&self, storage: &SharedStorage) -> u64 {
        let mut keys = Vec::new();
        let result = lock_storage(storage).load_all_known_urls(&mut |url| {
            keys.push(canonical_key_str(&url));
        });

        match result {
            Ok(count) => {
                self.seed_records(keys);
                tracing::info!("Dedup gate seeded with {} known deal URLs", count);
                count
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load known URLs, starting with an empty dedup gate: {}",
                    e
                );
                0
            }
        }
    }

    /// Adds keys to the record space
    pub fn seed_records<I: IntoIterator<Item = String>>(&self, keys: I) {
        self.lock().records.extend(keys);
    }

    /// Returns true if the record key is already known
    pub fn seen(&self, key: &str) -> bool {
        self.lock().records.contains(key)
    }

    /// Marks a record key as known
    pub fn mark_seen(&self, key: &str) {
        self.lock().records.insert(key.to_string());
    }

    /// Claims a record key for ingestion
    ///
    /// Returns false if the key was already known or claimed by another worker.
    pub fn try_claim_record(&self, key: &str) -> bool {
        self.lock().records.insert(key.to_string())
    }

    /// Gives back a claim whose ingestion failed
    pub fn release_record(&self, key: &str) {
        self.lock().records.remove(key);
    }

    /// Returns true if a page key was already claimed
    pub fn is_known_page(&self, key: &str) -> bool {
        self.lock().pages.contains(key)
    }

    /// Claims a page key for fetching
    ///
    /// When `also_record` is set (detail pages), a page whose URL is already a known
    /// record is refused as well.
    pub fn try_claim_page(&self, key: &str, also_record: bool) -> bool {
        let mut sets = self.lock();
        if also_record && sets.records.contains(key) {
            return false;
        }
        sets.pages.insert(key.to_string())
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        let sets = self.lock();
        sets.pages.is_empty() && sets.records.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, GateSets> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
