//! Database schema definitions
//!
//! Deals are keyed by their canonical URL; child tables carry a composite unique key
//! so repeated upserts of the same row are no-ops.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    requests INTEGER NOT NULL DEFAULT 0,
    fetched INTEGER NOT NULL DEFAULT 0,
    ingested INTEGER NOT NULL DEFAULT 0,
    skipped_terminal INTEGER NOT NULL DEFAULT 0,
    retries_exhausted INTEGER NOT NULL DEFAULT 0,
    storage_drops INTEGER NOT NULL DEFAULT 0,
    proxy_disabled INTEGER NOT NULL DEFAULT 0
);

-- One row per deal, keyed by canonical deal URL
CREATE TABLE IF NOT EXISTS deals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    deal_id TEXT,
    title TEXT NOT NULL,
    price TEXT,
    promo TEXT,
    store TEXT,
    category TEXT,
    brand TEXT,
    condition TEXT,
    description TEXT,
    deal_link TEXT,
    published TEXT,
    staff_pick INTEGER NOT NULL DEFAULT 0,
    first_seen_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deals_store ON deals(store);
CREATE INDEX IF NOT EXISTS idx_deals_category ON deals(category);

CREATE TABLE IF NOT EXISTS deal_images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deal_url TEXT NOT NULL,
    image_url TEXT NOT NULL,
    UNIQUE(deal_url, image_url)
);

CREATE TABLE IF NOT EXISTS deal_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deal_url TEXT NOT NULL,
    category_name TEXT NOT NULL,
    category_url TEXT,
    UNIQUE(deal_url, category_name)
);

CREATE TABLE IF NOT EXISTS related_deals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    deal_url TEXT NOT NULL,
    related_url TEXT NOT NULL,
    UNIQUE(deal_url, related_url)
);

CREATE INDEX IF NOT EXISTS idx_deal_images_deal ON deal_images(deal_url);
CREATE INDEX IF NOT EXISTS idx_deal_categories_deal ON deal_categories(deal_url);
CREATE INDEX IF NOT EXISTS idx_related_deals_deal ON related_deals(deal_url);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in [
            "runs",
            "deals",
            "deal_images",
            "deal_categories",
            "related_deals",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }
}
