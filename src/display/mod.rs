//! Display formatting for terminal output
//!
//! Formats catalog listings, statistics, run reports and restore reports
//! for the CLI.

pub mod backup;

pub use backup::{
    format_artifact_details, format_backup_page, format_restore_report, format_run_report,
    format_statistics,
};
