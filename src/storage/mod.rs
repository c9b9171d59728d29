//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Idempotent upserts of deals and their child rows
//! - Streaming known deal URLs to seed deduplication
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::SweepError;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A store shared between the coordinator and ingestion tasks
pub type SharedStorage = Arc<Mutex<dyn Storage>>;

/// Opens (or creates) the SQLite database at `path`
pub fn open_storage(path: &Path) -> Result<SqliteStorage, SweepError> {
    SqliteStorage::new(path)
}

/// Wraps a store for sharing between tasks
pub fn share<S: Storage + 'static>(storage: S) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks a shared store
///
/// A poisoned lock is recovered: each critical section is a single statement, so a
/// panicking holder cannot leave the connection half-updated.
pub fn lock_storage(storage: &SharedStorage) -> MutexGuard<'_, dyn Storage + 'static> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub fetched: u64,
    pub ingested: u64,
    pub skipped_terminal: u64,
    pub retries_exhausted: u64,
    pub storage_drops: u64,
    pub proxy_disabled: bool,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Row counts of the stored data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatistics {
    pub runs: u64,
    pub deals: u64,
    pub images: u64,
    pub categories: u64,
    pub related: u64,
    pub distinct_stores: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip() {
        for status in &[
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Interrupted,
            RunStatus::Failed,
        ] {
            let db_str = status.to_db_string();
            assert_eq!(Some(*status), RunStatus::from_db_string(db_str));
        }
    }

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
    }
}
