//! Backup display formatting
//!
//! Formats catalog pages as tables and reports as detail views.

use chrono::{DateTime, Utc};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::backup::{
    format_size, BackupArtifact, BackupPage, BackupStatistics, RestoreOutcome, RestoreReport,
    RunReport,
};

/// Length of the id prefix shown in tables
const SHORT_ID_LEN: usize = 12;

#[derive(Tabled)]
struct ArtifactRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Filename")]
    filename: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Age")]
    age: String,
}

#[derive(Tabled)]
struct VerboseArtifactRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Format")]
    format: String,
    #[tabled(rename = "Filename")]
    filename: String,
    #[tabled(rename = "Bytes")]
    size: u64,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Modified")]
    modified: String,
}

/// Format one catalog page as a table
pub fn format_backup_page(page: &BackupPage, verbose: bool, now: DateTime<Utc>) -> String {
    if page.items.is_empty() {
        return if page.total == 0 {
            "No backups found.".to_string()
        } else {
            format!(
                "Page {} is empty ({} backups over {} pages).",
                page.page, page.total, page.total_pages
            )
        };
    }

    let mut table = if verbose {
        Table::new(page.items.iter().map(|a| VerboseArtifactRow {
            id: a.id.clone(),
            kind: a.kind.to_string(),
            format: a.format.to_string(),
            filename: a.filename.clone(),
            size: a.size,
            created: format_timestamp(a.created_at),
            modified: format_timestamp(a.modified_at),
        }))
    } else {
        let offset = (page.page - 1) * page.per_page;
        Table::new(page.items.iter().enumerate().map(|(i, a)| ArtifactRow {
            index: offset + i + 1,
            id: short_id(&a.id).to_string(),
            kind: a.kind.to_string(),
            filename: a.filename.clone(),
            size: format_size(a.size),
            age: format_duration(now.signed_duration_since(a.modified_at)),
        }))
    };
    table.with(Style::psql());

    format!(
        "{}\n\nPage {} of {} ({} backups)",
        table,
        page.page,
        page.total_pages,
        page.total
    )
}

/// Format catalog statistics
pub fn format_statistics(stats: &BackupStatistics) -> String {
    let mut output = String::new();
    output.push_str("Backup Statistics\n");
    output.push_str("=================\n");
    output.push_str(&format!("  Total backups:    {}\n", stats.total_backups));
    output.push_str(&format!("  Total size:       {}\n", stats.total_size_formatted));
    output.push_str(&format!("  Database backups: {}\n", stats.database_backups));
    output.push_str(&format!("  Storage backups:  {}\n", stats.storage_backups));
    output.push_str(&format!("  Config backups:   {}\n", stats.config_backups));

    if let Some(latest) = &stats.latest_backup {
        output.push_str(&format!(
            "  Latest:           {} ({})\n",
            latest.filename,
            format_timestamp(latest.created_at)
        ));
    }
    if let Some(oldest) = &stats.oldest_backup {
        output.push_str(&format!(
            "  Oldest:           {} ({})\n",
            oldest.filename,
            format_timestamp(oldest.created_at)
        ));
    }
    output
}

/// Format a single artifact's details
pub fn format_artifact_details(artifact: &BackupArtifact) -> String {
    let mut output = String::new();
    output.push_str(&format!("Backup: {}\n", artifact.filename));
    output.push_str(&format!("  ID:       {}\n", artifact.id));
    output.push_str(&format!("  Type:     {}\n", artifact.kind));
    output.push_str(&format!("  Format:   {}\n", artifact.format));
    output.push_str(&format!(
        "  Size:     {} ({} bytes)\n",
        format_size(artifact.size),
        artifact.size
    ));
    output.push_str(&format!("  Created:  {}\n", format_timestamp(artifact.created_at)));
    output.push_str(&format!("  Modified: {}\n", format_timestamp(artifact.modified_at)));
    output.push_str(&format!("  Path:     {}\n", artifact.path.display()));
    output
}

/// Format the outcome of a backup run, one line per kind
pub fn format_run_report(report: &RunReport) -> String {
    let mut output = String::new();
    for (kind, result) in &report.results {
        let marker = if result.success { "ok" } else { "FAILED" };
        output.push_str(&format!("  {:<9} {:<6} {}\n", kind, marker, result.message));
        if let Some(path) = &result.artifact {
            output.push_str(&format!("            -> {}\n", path.display()));
        }
    }
    output.push_str(&report.summary());
    output
}

/// Format the outcome of a restore. The transcript is included when
/// `verbose` is set or the restore failed.
pub fn format_restore_report(report: &RestoreReport, verbose: bool) -> String {
    let mut output = String::new();
    let status = if report.success {
        "Restore complete"
    } else {
        "Restore finished with errors"
    };
    output.push_str(&format!("{}: {}\n", status, report.artifact.filename));
    output.push_str(&format!("  {}\n", report.summary));

    if let Some(RestoreOutcome::Database { replay, .. }) = &report.outcome {
        for failure in replay.failures.iter().take(10) {
            output.push_str(&format!(
                "  statement {}: {}\n",
                failure.index, failure.error
            ));
        }
        if replay.failures.len() > 10 {
            output.push_str(&format!(
                "  ... and {} more\n",
                replay.failures.len() - 10
            ));
        }
    }

    if verbose || !report.success {
        output.push_str("\nTranscript:\n");
        for line in &report.transcript {
            output.push_str(&format!("  {}\n", line));
        }
    }
    output
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(SHORT_ID_LEN)]
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupCatalog;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_page() {
        let temp = TempDir::new().unwrap();
        let page = BackupCatalog::new(temp.path()).list(1, 20);
        assert_eq!(format_backup_page(&page, false, Utc::now()), "No backups found.");
    }

    #[test]
    fn test_page_table_lists_filenames() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("db_backup_20240115_093000.sql.gz"), [0u8; 10]).unwrap();
        fs::write(temp.path().join("config_backup_20240115_093000.tar.gz"), [0u8; 10]).unwrap();
        let page = BackupCatalog::new(temp.path()).list(1, 20);

        let output = format_backup_page(&page, false, Utc::now());
        assert!(output.contains("db_backup_20240115_093000.sql.gz"));
        assert!(output.contains("config"));
        assert!(output.contains("Page 1 of 1 (2 backups)"));

        let verbose = format_backup_page(&page, true, Utc::now());
        assert!(verbose.contains(&page.items[0].id));
    }

    #[test]
    fn test_statistics_text() {
        let output = format_statistics(&BackupStatistics {
            total_size_formatted: "0 B".into(),
            ..Default::default()
        });
        assert!(output.contains("Total backups:    0"));
        assert!(!output.contains("Latest"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(30)), "30s");
        assert_eq!(format_duration(chrono::Duration::minutes(5)), "5m");
        assert_eq!(format_duration(chrono::Duration::hours(3)), "3h");
        assert_eq!(format_duration(chrono::Duration::days(2)), "2d");
        assert_eq!(format_duration(chrono::Duration::days(65)), "2mo");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }
}
