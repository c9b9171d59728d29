//! Storage traits and error types
//!
//! This module defines the Persistent Store contract the crawl core consumes and the
//! associated error types.

use crate::records::CandidateRecord;
use crate::state::RunSummary;
use crate::storage::{RunRecord, RunStatus, StoreStatistics};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent Store consumed by the crawl core
///
/// Implementations are driven from one thread at a time behind a mutex; `Send` is
/// required so the store can move into blocking tasks.
pub trait Storage: Send {
    // ===== Run Management =====

    /// Creates a new crawl run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Marks a run as finished with its final status and counts
    fn complete_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    // ===== Ingestion =====

    /// Streams every known deal URL to `visit`
    ///
    /// Used once at startup to seed the dedup gate.
    ///
    /// # Returns
    ///
    /// The number of URLs visited
    fn load_all_known_urls(&self, visit: &mut dyn FnMut(String)) -> StorageResult<u64>;

    /// Inserts or updates a record by its natural key
    ///
    /// Calling this twice with the same record must not create a second row.
    fn upsert(&mut self, record: &CandidateRecord) -> StorageResult<()>;

    /// Drops and reopens the underlying connection
    fn reconnect(&mut self) -> StorageResult<()>;

    // ===== Statistics =====

    /// Gets row counts of the stored data
    fn statistics(&self) -> StorageResult<StoreStatistics>;
}
