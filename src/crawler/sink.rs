//! Ingestion sink
//!
//! Hands extracted records to the store exactly once per natural key. A record's key is
//! claimed in the dedup gate before the upsert; a failed upsert gives the claim back.
//! Deals also reserve one of the `max_records` slots up front, so concurrent pages can
//! never store more deals than the cap. Child rows are only written for deals that were
//! not refused or dropped within the same batch.
//! Upserts run on the blocking pool and are retried with a reconnect in between. Storage
//! failures never leave this module as errors.

use crate::config::StorageConfig;
use crate::crawler::dedup::DedupGate;
use crate::records::CandidateRecord;
use crate::state::RunCounters;
use crate::storage::{lock_storage, SharedStorage, StorageError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of ingesting one page's records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub deals: usize,
    pub children: usize,
    pub duplicates: usize,
    pub dropped: usize,
    /// Deals refused by the record cap plus children of deals that were not stored
    pub skipped: usize,
}

pub struct IngestionSink {
    storage: SharedStorage,
    gate: Arc<DedupGate>,
    counters: Arc<RunCounters>,
    attempts: u32,
    retry_delay: Duration,
    max_records: u64,
    reserved: AtomicU64,
}

impl IngestionSink {
    pub fn new(
        storage: SharedStorage,
        gate: Arc<DedupGate>,
        counters: Arc<RunCounters>,
        config: &StorageConfig,
        max_records: u64,
    ) -> Self {
        Self {
            storage,
            gate,
            counters,
            attempts: config.upsert_attempts.max(1),
            retry_delay: Duration::from_millis(config.upsert_retry_delay_ms),
            max_records,
            reserved: AtomicU64::new(0),
        }
    }

    /// Returns true once `max_records` deals have been ingested
    pub fn limit_reached(&self) -> bool {
        self.counters.ingested.load(Ordering::Relaxed) >= self.max_records
    }

    /// Takes one deal slot, failing once every slot is stored or in flight
    fn try_reserve(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < self.max_records).then_some(taken + 1)
            })
            .is_ok()
    }

    fn release_reservation(&self) {
        self.reserved.fetch_sub(1, Ordering::AcqRel);
    }

    /// Ingests the records of one page
    ///
    /// Deals beyond the record cap are not written, and neither are their child rows.
    pub async fn ingest(&self, records: Vec<CandidateRecord>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut unstored: HashSet<String> = HashSet::new();

        for record in records {
            if let Some(parent) = record.parent_key() {
                if unstored.contains(&parent) {
                    tracing::trace!("Skipping {} row of unstored deal {}", record.label(), parent);
                    report.skipped += 1;
                    continue;
                }
            }

            let key = record.natural_key();
            if !self.gate.try_claim_record(&key) {
                RunCounters::bump(&self.counters.duplicates);
                report.duplicates += 1;
                continue;
            }

            if record.is_deal() && !self.try_reserve() {
                tracing::trace!("Record cap reached, not ingesting {}", key);
                self.gate.release_record(&key);
                unstored.insert(key);
                report.skipped += 1;
                continue;
            }

            match self.upsert_with_retry(&record).await {
                Ok(()) => {
                    if record.is_deal() {
                        RunCounters::bump(&self.counters.ingested);
                        report.deals += 1;
                    } else {
                        RunCounters::bump(&self.counters.ingested_children);
                        report.children += 1;
                    }
                }
                Err(e) => {
                    self.gate.release_record(&key);
                    RunCounters::bump(&self.counters.storage_drops);
                    report.dropped += 1;
                    tracing::error!(
                        "Dropping {} record {} after {} attempts: {}",
                        record.label(),
                        key,
                        self.attempts,
                        e
                    );
                    if record.is_deal() {
                        self.release_reservation();
                        unstored.insert(key);
                    }
                }
            }
        }

        report
    }

    async fn upsert_with_retry(&self, record: &CandidateRecord) -> Result<(), StorageError> {
        let mut attempt = 1;
        loop {
            let storage = Arc::clone(&self.storage);
            let owned = record.clone();
            let result = tokio::task::spawn_blocking(move || lock_storage(&storage).upsert(&owned))
                .await
                .unwrap_or_else(|e| Err(StorageError::Database(format!("upsert task failed: {}", e))));

            let error = match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => e,
            };

            tracing::warn!(
                "Upsert of {} failed (attempt {}/{}): {}; reconnecting",
                record.natural_key(),
                attempt,
                self.attempts,
                error
            );
            tokio::time::sleep(self.retry_delay).await;
            self.reconnect().await;
            attempt += 1;
        }
    }

    async fn reconnect(&self) {
        let storage = Arc::clone(&self.storage);
        let result = tokio::task::spawn_blocking(move || lock_storage(&storage).reconnect()).await;
        match result {
            Ok(Ok(())) => tracing::debug!("Store reconnected"),
            Ok(Err(e)) => tracing::warn!("Store reconnect failed: {}", e),
            Err(e) => tracing::warn!("Store reconnect task failed: {}", e),
        }
    }
}
