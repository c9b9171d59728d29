//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::records::{CandidateRecord, DealRecord};
use crate::state::RunSummary;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, StoreStatistics};
use crate::SweepError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    /// Database file, None for in-memory databases
    path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(SweepError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, SweepError> {
        let conn = open_connection(path)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, SweepError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self { conn, path: None })
    }

    fn upsert_deal(&self, deal: &DealRecord) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO deals (url, deal_id, title, price, promo, store, category, brand,
                condition, description, deal_link, published, staff_pick, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(url) DO UPDATE SET
                deal_id = COALESCE(excluded.deal_id, deals.deal_id),
                title = excluded.title,
                price = COALESCE(excluded.price, deals.price),
                promo = COALESCE(excluded.promo, deals.promo),
                store = COALESCE(excluded.store, deals.store),
                category = COALESCE(excluded.category, deals.category),
                brand = COALESCE(excluded.brand, deals.brand),
                condition = COALESCE(excluded.condition, deals.condition),
                description = COALESCE(excluded.description, deals.description),
                deal_link = COALESCE(excluded.deal_link, deals.deal_link),
                published = COALESCE(excluded.published, deals.published),
                staff_pick = MAX(excluded.staff_pick, deals.staff_pick),
                updated_at = excluded.updated_at",
            params![
                deal.url,
                deal.deal_id,
                deal.title,
                deal.price,
                deal.promo,
                deal.store,
                deal.category,
                deal.brand,
                deal.condition,
                deal.description,
                deal.deal_link,
                deal.published,
                deal.staff_pick,
                now,
            ],
        )?;
        Ok(())
    }

    fn count(&self, table: &str) -> StorageResult<u64> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn complete_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        summary: &RunSummary,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, requests = ?3, fetched = ?4,
                ingested = ?5, skipped_terminal = ?6, retries_exhausted = ?7,
                storage_drops = ?8, proxy_disabled = ?9
             WHERE id = ?10",
            params![
                status.to_db_string(),
                now,
                summary.requests as i64,
                summary.fetched as i64,
                summary.ingested as i64,
                summary.skipped_terminal as i64,
                summary.retries_exhausted as i64,
                summary.storage_drops as i64,
                summary.proxy_disabled,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status, fetched, ingested,
                skipped_terminal, retries_exhausted, storage_drops, proxy_disabled
             FROM runs ORDER BY id DESC LIMIT 1",
        )?;

        let run = stmt
            .query_row([], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    config_hash: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Failed),
                    fetched: row.get::<_, i64>(5)? as u64,
                    ingested: row.get::<_, i64>(6)? as u64,
                    skipped_terminal: row.get::<_, i64>(7)? as u64,
                    retries_exhausted: row.get::<_, i64>(8)? as u64,
                    storage_drops: row.get::<_, i64>(9)? as u64,
                    proxy_disabled: row.get(10)?,
                })
            })
            .optional()?;

        Ok(run)
    }

    // ===== Ingestion =====

    fn load_all_known_urls(&self, visit: &mut dyn FnMut(String)) -> StorageResult<u64> {
        let mut stmt = self.conn.prepare("SELECT url FROM deals")?;
        let mut rows = stmt.query([])?;

        let mut count = 0;
        while let Some(row) = rows.next()? {
            visit(row.get(0)?);
            count += 1;
        }
        Ok(count)
    }

    fn upsert(&mut self, record: &CandidateRecord) -> StorageResult<()> {
        match record {
            CandidateRecord::Deal(deal) => self.upsert_deal(deal)?,
            CandidateRecord::Image {
                deal_url,
                image_url,
            } => {
                self.conn.execute(
                    "INSERT INTO deal_images (deal_url, image_url) VALUES (?1, ?2)
                     ON CONFLICT(deal_url, image_url) DO NOTHING",
                    params![deal_url, image_url],
                )?;
            }
            CandidateRecord::Category {
                deal_url,
                name,
                url,
            } => {
                self.conn.execute(
                    "INSERT INTO deal_categories (deal_url, category_name, category_url)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(deal_url, category_name) DO NOTHING",
                    params![deal_url, name, url],
                )?;
            }
            CandidateRecord::Related {
                deal_url,
                related_url,
            } => {
                self.conn.execute(
                    "INSERT INTO related_deals (deal_url, related_url) VALUES (?1, ?2)
                     ON CONFLICT(deal_url, related_url) DO NOTHING",
                    params![deal_url, related_url],
                )?;
            }
        }
        Ok(())
    }

    fn reconnect(&mut self) -> StorageResult<()> {
        match &self.path {
            Some(path) => {
                self.conn = open_connection(path)?;
            }
            None => {
                // An in-memory database cannot be reopened without losing it
                self.conn.execute_batch("SELECT 1")?;
            }
        }
        Ok(())
    }

    // ===== Statistics =====

    fn statistics(&self) -> StorageResult<StoreStatistics> {
        let distinct_stores: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT store) FROM deals WHERE store IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStatistics {
            runs: self.count("runs")?,
            deals: self.count("deals")?,
            images: self.count("deal_images")?,
            categories: self.count("deal_categories")?,
            related: self.count("related_deals")?,
            distinct_stores: distinct_stores as u64,
        })
    }
}

/// Opens a connection with the crawler's pragmas and ensures the schema exists
fn open_connection(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        PRAGMA busy_timeout = 5000;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deal(url: &str, title: &str) -> CandidateRecord {
        CandidateRecord::Deal(DealRecord {
            url: url.to_string(),
            title: title.to_string(),
            price: Some("$19.99".to_string()),
            store: Some("Amazon".to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_create_in_memory() {
        assert!(SqliteStorage::new_in_memory().is_ok());
    }

    #[test]
    fn test_create_and_complete_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("test_hash").unwrap();
        assert!(run_id > 0);

        let summary = RunSummary {
            fetched: 12,
            ingested: 40,
            skipped_terminal: 2,
            proxy_disabled: true,
            ..Default::default()
        };
        storage
            .complete_run(run_id, RunStatus::Completed, &summary)
            .unwrap();

        let latest = storage.get_latest_run().unwrap().unwrap();
        assert_eq!(latest.id, run_id);
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.fetched, 12);
        assert_eq!(latest.ingested, 40);
        assert!(latest.proxy_disabled);
        assert!(latest.finished_at.is_some());
    }

    #[test]
    fn test_complete_unknown_run_fails() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let result = storage.complete_run(99, RunStatus::Completed, &RunSummary::default());
        assert!(matches!(result, Err(StorageError::RunNotFound(99))));
    }

    #[test]
    fn test_latest_run_empty() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        assert!(storage.get_latest_run().unwrap().is_none());
    }

    #[test]
    fn test_upsert_deal_is_idempotent() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();

        storage
            .upsert(&deal("https://www.dealnews.com/deal/1", "Old title"))
            .unwrap();
        storage
            .upsert(&deal("https://www.dealnews.com/deal/1", "New title"))
            .unwrap();

        let stats = storage.statistics().unwrap();
        assert_eq!(stats.deals, 1);
        assert_eq!(stats.distinct_stores, 1);

        let title: String = storage
            .conn
            .query_row("SELECT title FROM deals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(title, "New title");
    }

    #[test]
    fn test_upsert_keeps_fields_missing_from_update() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .upsert(&deal("https://www.dealnews.com/deal/1", "TV"))
            .unwrap();
        storage
            .upsert(&CandidateRecord::Deal(DealRecord {
                url: "https://www.dealnews.com/deal/1".to_string(),
                title: "TV".to_string(),
                ..Default::default()
            }))
            .unwrap();

        let price: Option<String> = storage
            .conn
            .query_row("SELECT price FROM deals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(price.as_deref(), Some("$19.99"));
    }

    #[test]
    fn test_child_rows_are_unique() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let image = CandidateRecord::Image {
            deal_url: "https://www.dealnews.com/deal/1".to_string(),
            image_url: "https://c.dlnws.com/1.jpg".to_string(),
        };
        let category = CandidateRecord::Category {
            deal_url: "https://www.dealnews.com/deal/1".to_string(),
            name: "Electronics".to_string(),
            url: Some("https://www.dealnews.com/c142/Electronics".to_string()),
        };
        let related = CandidateRecord::Related {
            deal_url: "https://www.dealnews.com/deal/1".to_string(),
            related_url: "https://www.dealnews.com/deal/2".to_string(),
        };

        for _ in 0..2 {
            storage.upsert(&image).unwrap();
            storage.upsert(&category).unwrap();
            storage.upsert(&related).unwrap();
        }

        let stats = storage.statistics().unwrap();
        assert_eq!(stats.images, 1);
        assert_eq!(stats.categories, 1);
        assert_eq!(stats.related, 1);
        assert_eq!(stats.deals, 0);
    }

    #[test]
    fn test_load_all_known_urls() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .upsert(&deal("https://www.dealnews.com/deal/1", "A"))
            .unwrap();
        storage
            .upsert(&deal("https://www.dealnews.com/deal/2", "B"))
            .unwrap();

        let mut urls = Vec::new();
        let count = storage
            .load_all_known_urls(&mut |url| urls.push(url))
            .unwrap();

        urls.sort();
        assert_eq!(count, 2);
        assert_eq!(
            urls,
            vec![
                "https://www.dealnews.com/deal/1".to_string(),
                "https://www.dealnews.com/deal/2".to_string()
            ]
        );
    }

    #[test]
    fn test_reconnect_keeps_file_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deals.db");

        let mut storage = SqliteStorage::new(&path).unwrap();
        storage
            .upsert(&deal("https://www.dealnews.com/deal/1", "A"))
            .unwrap();

        storage.reconnect().unwrap();
        assert_eq!(storage.statistics().unwrap().deals, 1);
    }
}
