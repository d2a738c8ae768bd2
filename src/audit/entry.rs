//! Audit entry data structures
//!
//! `AuditEntry` is an administrative action this crate records into the
//! audit table. `AuditRow` is one arbitrary row captured from that table
//! while a restore runs.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Timestamp layout used in the audit table (sortable as text)
pub const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Administrative actions that are audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BackupRun,
    BackupDeleted,
    BackupRestored,
    RestoreFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BackupRun => "backup_run",
            AuditAction::BackupDeleted => "backup_deleted",
            AuditAction::BackupRestored => "backup_restored",
            AuditAction::RestoreFailed => "restore_failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "backup_run" => Some(AuditAction::BackupRun),
            "backup_deleted" => Some(AuditAction::BackupDeleted),
            "backup_restored" => Some(AuditAction::BackupRestored),
            "restore_failed" => Some(AuditAction::RestoreFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::BackupRun => write!(f, "BACKUP"),
            AuditAction::BackupDeleted => write!(f, "DELETE"),
            AuditAction::BackupRestored => write!(f, "RESTORE"),
            AuditAction::RestoreFailed => write!(f, "RESTORE FAILED"),
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// What was done
    pub action: AuditAction,

    /// What it was done to (an artifact filename or a backup kind)
    pub subject: String,

    /// Human-readable outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// When it happened (UTC)
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, subject: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            action,
            subject: subject.into(),
            detail,
            created_at: Utc::now(),
        }
    }

    pub fn backup_run(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(AuditAction::BackupRun, subject, Some(detail.into()))
    }

    pub fn backup_deleted(filename: impl Into<String>) -> Self {
        Self::new(AuditAction::BackupDeleted, filename, None)
    }

    /// Outcome of a restore, successful or not
    pub fn restore(filename: impl Into<String>, success: bool, summary: impl Into<String>) -> Self {
        let action = if success {
            AuditAction::BackupRestored
        } else {
            AuditAction::RestoreFailed
        };
        Self::new(action, filename, Some(summary.into()))
    }

    /// `created_at` in the table's text layout
    pub fn timestamp_text(&self) -> String {
        self.created_at.format(AUDIT_TIMESTAMP_FORMAT).to_string()
    }

    /// Parse a timestamp written by `timestamp_text`
    pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(text, AUDIT_TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {}",
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.action,
            self.subject
        );

        if let Some(detail) = &self.detail {
            output.push_str(&format!("\n  {}", detail));
        }

        output
    }
}

/// One captured audit row: ordered `(column, value)` pairs, identity key
/// excluded
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub values: Vec<(String, Value)>,
}

impl AuditRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}
