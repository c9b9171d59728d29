//! Output module for run reports and database statistics
//!
//! This module handles:
//! - Formatting the final counts of a crawl run
//! - Reporting row counts and the latest run from the deal database

mod report;
pub mod stats;

pub use report::{format_run_report, print_run_report};
pub use stats::{format_statistics, load_statistics, print_statistics, DatabaseStatistics};
