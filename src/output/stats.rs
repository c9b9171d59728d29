//! Statistics from the deal database
//!
//! Backs the `--stats` command: row counts plus the most recent run.

use crate::storage::{RunRecord, Storage, StoreStatistics};
use crate::SweepError;

/// Database statistics together with the latest run
#[derive(Debug, Clone)]
pub struct DatabaseStatistics {
    pub store: StoreStatistics,
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(DatabaseStatistics)` - Successfully loaded statistics
/// * `Err(SweepError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<DatabaseStatistics, SweepError> {
    Ok(DatabaseStatistics {
        store: storage.statistics()?,
        latest_run: storage.get_latest_run()?,
    })
}

/// Returns the wall-clock duration of a finished run in seconds
pub fn run_duration_seconds(run: &RunRecord) -> Option<i64> {
    let started = chrono::DateTime::parse_from_rfc3339(&run.started_at).ok()?;
    let finished = chrono::DateTime::parse_from_rfc3339(run.finished_at.as_deref()?).ok()?;
    Some((finished - started).num_seconds())
}

/// Formats statistics for the terminal
pub fn format_statistics(stats: &DatabaseStatistics) -> String {
    let mut out = String::new();
    let store = &stats.store;

    out.push_str("=== Deal Database ===\n\n");
    out.push_str(&format!("  Deals:              {}\n", store.deals));
    out.push_str(&format!("  Distinct stores:    {}\n", store.distinct_stores));
    out.push_str(&format!("  Images:             {}\n", store.images));
    out.push_str(&format!("  Category links:     {}\n", store.categories));
    out.push_str(&format!("  Related deal links: {}\n", store.related));
    out.push_str(&format!("  Runs:               {}\n", store.runs));

    match &stats.latest_run {
        Some(run) => {
            out.push_str("\nLatest run:\n");
            out.push_str(&format!("  ID:                {}\n", run.id));
            out.push_str(&format!("  Status:            {}\n", run.status.to_db_string()));
            out.push_str(&format!("  Started:           {}\n", run.started_at));
            if let Some(finished) = &run.finished_at {
                out.push_str(&format!("  Finished:          {}\n", finished));
            }
            if let Some(secs) = run_duration_seconds(run) {
                out.push_str(&format!("  Duration:          {}s\n", secs));
            }
            out.push_str(&format!("  Fetched:           {}\n", run.fetched));
            out.push_str(&format!("  Ingested:          {}\n", run.ingested));
            out.push_str(&format!("  Skipped:           {}\n", run.skipped_terminal));
            out.push_str(&format!("  Retries exhausted: {}\n", run.retries_exhausted));
            out.push_str(&format!("  Storage drops:     {}\n", run.storage_drops));
            out.push_str(&format!(
                "  Proxy disabled:    {}\n",
                if run.proxy_disabled { "yes" } else { "no" }
            ));
        }
        None => out.push_str("\nNo runs recorded yet\n"),
    }

    out
}

/// Prints statistics to stdout
pub fn print_statistics(stats: &DatabaseStatistics) {
    print!("{}", format_statistics(stats));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CandidateRecord, DealRecord};
    use crate::state::RunSummary;
    use crate::storage::{RunStatus, SqliteStorage};

    #[test]
    fn test_statistics_of_empty_database() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.store.deals, 0);
        assert!(stats.latest_run.is_none());
        assert!(format_statistics(&stats).contains("No runs recorded yet"));
    }

    #[test]
    fn test_statistics_with_run() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.create_run("hash").unwrap();
        storage
            .upsert(&CandidateRecord::Deal(DealRecord {
                url: "https://www.dealnews.com/deal/1".to_string(),
                title: "TV".to_string(),
                store: Some("Best Buy".to_string()),
                ..Default::default()
            }))
            .unwrap();
        let summary = RunSummary {
            fetched: 3,
            ingested: 1,
            ..Default::default()
        };
        storage
            .complete_run(run_id, RunStatus::Completed, &summary)
            .unwrap();

        let stats = load_statistics(&storage).unwrap();
        assert_eq!(stats.store.deals, 1);
        assert_eq!(stats.store.distinct_stores, 1);

        let text = format_statistics(&stats);
        assert!(text.contains("Status:            completed"));
        assert!(text.contains("Fetched:           3"));
    }

    #[test]
    fn test_run_duration() {
        let run = RunRecord {
            id: 1,
            started_at: "2024-01-01T00:00:00+00:00".to_string(),
            finished_at: Some("2024-01-01T00:01:30+00:00".to_string()),
            config_hash: "h".to_string(),
            status: RunStatus::Completed,
            fetched: 0,
            ingested: 0,
            skipped_terminal: 0,
            retries_exhausted: 0,
            storage_drops: 0,
            proxy_disabled: false,
        };
        assert_eq!(run_duration_seconds(&run), Some(90));
    }
}
