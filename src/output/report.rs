//! End-of-run report

use crate::state::RunSummary;

/// Formats the final counts of a run
pub fn format_run_report(summary: &RunSummary) -> String {
    let mut out = String::new();

    out.push_str("=== Crawl Run Report ===\n\n");
    out.push_str(&format!("  Requests issued:        {}\n", summary.requests));
    out.push_str(&format!("  Pages fetched:          {}\n", summary.fetched));
    out.push_str(&format!("  Deals ingested:         {}\n", summary.ingested));
    out.push_str(&format!("  Child rows ingested:    {}\n", summary.ingested_children));
    out.push_str(&format!("  Duplicates skipped:     {}\n", summary.duplicates));
    out.push_str(&format!("  Targets discovered:     {}\n", summary.discovered));
    out.push_str(&format!("  Retries scheduled:      {}\n", summary.retries));
    out.push_str(&format!("  Skipped (terminal):     {}\n", summary.skipped_terminal));
    out.push_str(&format!("  Retries exhausted:      {}\n", summary.retries_exhausted));
    out.push_str(&format!("  Storage drops:          {}\n", summary.storage_drops));
    out.push_str(&format!(
        "  Proxy disabled:         {}\n",
        if summary.proxy_disabled { "yes" } else { "no" }
    ));
    out.push_str(&format!(
        "  Elapsed:                {:.1}s ({:.2} pages/sec)\n",
        summary.elapsed.as_secs_f64(),
        summary.fetch_rate()
    ));

    out
}

pub fn print_run_report(summary: &RunSummary) {
    print!("{}", format_run_report(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_report_contains_final_counts() {
        let summary = RunSummary {
            fetched: 10,
            ingested: 42,
            skipped_terminal: 2,
            retries_exhausted: 1,
            proxy_disabled: true,
            elapsed: Duration::from_secs(5),
            ..Default::default()
        };

        let report = format_run_report(&summary);
        assert!(report.contains("Pages fetched:          10"));
        assert!(report.contains("Deals ingested:         42"));
        assert!(report.contains("Skipped (terminal):     2"));
        assert!(report.contains("Retries exhausted:      1"));
        assert!(report.contains("Proxy disabled:         yes"));
        assert!(report.contains("2.00 pages/sec"));
    }
}
