//! Audit trail for keepsake
//!
//! The audit trail is an append-only table inside the live database
//! (`activity_log` by default). Two things use it:
//!
//! - `AuditEntry`: an administrative action (backup run, delete, restore)
//!   recorded by the CLI through `AuditLog::record`.
//! - `AuditSnapshot`: the whole table captured by `AuditLog::snapshot`
//!   before a database replay and written back by `AuditLog::replace_all`
//!   afterwards. The rows present when the restore started are exactly the
//!   rows present when it ends.
//!
//! # Example
//!
//! ```rust,ignore
//! use keepsake::audit::{AuditEntry, AuditLog};
//!
//! let audit = AuditLog::new(&db, &settings.audit);
//! audit.record(&AuditEntry::backup_deleted("db_backup_20240115_093000.sql.gz"))?;
//!
//! let snapshot = audit.snapshot()?;
//! // ... replay ...
//! if let Some(snapshot) = snapshot {
//!     audit.replace_all(&snapshot, &mut log)?;
//! }
//! ```

mod entry;
mod log;

pub use entry::{AuditAction, AuditEntry, AuditRow, AUDIT_TIMESTAMP_FORMAT};
pub use log::{AuditLog, AuditRestore, AuditSnapshot};
