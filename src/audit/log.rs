//! The audit table inside the live database
//!
//! Entries are appended by the CLI after administrative actions. During a
//! database restore the table is captured before the replay and written
//! back afterwards, so the audit trail reflects the live system rather
//! than whatever the backup contained.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use serde::Serialize;

use crate::config::settings::AuditSettings;
use crate::database::sql::quote_ident;
use crate::database::Database;
use crate::error::KeepsakeResult;
use crate::logging::OpLog;

use super::entry::{AuditAction, AuditEntry, AuditRow};

/// Everything needed to put the audit table back after a replay
#[derive(Debug, Clone)]
pub struct AuditSnapshot {
    /// `CREATE TABLE` text, used if the replay removed the table
    pub create_sql: String,
    /// Rows newest first
    pub rows: Vec<AuditRow>,
}

/// Result of writing a snapshot back
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditRestore {
    pub restored: usize,
    pub failed: usize,
}

/// Access to the audit table of one database
pub struct AuditLog<'a> {
    db: &'a Database,
    settings: &'a AuditSettings,
}

impl<'a> AuditLog<'a> {
    pub fn new(db: &'a Database, settings: &'a AuditSettings) -> Self {
        Self { db, settings }
    }

    fn table(&self) -> String {
        quote_ident(&self.settings.table)
    }

    pub fn exists(&self) -> KeepsakeResult<bool> {
        self.db.table_exists(&self.settings.table)
    }

    /// Create the table in the layout `record` writes
    pub fn ensure_table(&self) -> KeepsakeResult<()> {
        self.db.connection().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                {} INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                subject TEXT NOT NULL,
                detail TEXT,
                {} TEXT NOT NULL
            );",
            self.table(),
            quote_ident(&self.settings.key_column),
            quote_ident(&self.settings.timestamp_column),
        ))?;
        Ok(())
    }

    /// Append an entry
    pub fn record(&self, entry: &AuditEntry) -> KeepsakeResult<()> {
        self.ensure_table()?;
        self.db.connection().execute(
            &format!(
                "INSERT INTO {} (action, subject, detail, {}) VALUES (?1, ?2, ?3, ?4)",
                self.table(),
                quote_ident(&self.settings.timestamp_column),
            ),
            params![
                entry.action.as_str(),
                entry.subject,
                entry.detail,
                entry.timestamp_text()
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> KeepsakeResult<u64> {
        if !self.exists()? {
            return Ok(0);
        }
        self.db.row_count(&self.settings.table)
    }

    /// The most recent entries this crate recorded, newest first.
    ///
    /// Rows written by other producers are skipped.
    pub fn read_recent(&self, limit: usize) -> KeepsakeResult<Vec<AuditEntry>> {
        if !self.exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self.db.connection().prepare(&format!(
            "SELECT action, subject, detail, {ts} FROM {table} ORDER BY {ts} DESC, {key} DESC LIMIT ?1",
            ts = quote_ident(&self.settings.timestamp_column),
            table = self.table(),
            key = quote_ident(&self.settings.key_column),
        ))?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(action, subject, detail, created_at)| {
                Some(AuditEntry {
                    action: AuditAction::parse(&action)?,
                    subject,
                    detail,
                    created_at: AuditEntry::parse_timestamp(&created_at)?,
                })
            })
            .collect())
    }

    /// Capture every row (identity key excluded), newest first.
    ///
    /// Returns `None` when the table does not exist.
    pub fn snapshot(&self) -> KeepsakeResult<Option<AuditSnapshot>> {
        if !self.exists()? {
            return Ok(None);
        }

        let create_sql = self.db.create_statement(&self.settings.table)?;
        let all_columns = self.db.table_columns(&self.settings.table)?;
        let columns: Vec<String> = all_columns
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&self.settings.key_column))
            .cloned()
            .collect();
        if columns.is_empty() {
            return Ok(Some(AuditSnapshot {
                create_sql,
                rows: Vec::new(),
            }));
        }

        let mut order = Vec::new();
        if all_columns.iter().any(|c| c.eq_ignore_ascii_case(&self.settings.timestamp_column)) {
            order.push(format!("{} DESC", quote_ident(&self.settings.timestamp_column)));
        }
        if all_columns.iter().any(|c| c.eq_ignore_ascii_case(&self.settings.key_column)) {
            order.push(format!("{} DESC", quote_ident(&self.settings.key_column)));
        }
        let order_by = if order.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", order.join(", "))
        };

        let select_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.db.connection().prepare(&format!(
            "SELECT {} FROM {}{}",
            select_list,
            self.table(),
            order_by
        ))?;

        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(columns.len());
                for (i, column) in columns.iter().enumerate() {
                    values.push((column.clone(), row.get::<_, Value>(i)?));
                }
                Ok(AuditRow { values })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(AuditSnapshot { create_sql, rows }))
    }

    /// Replace the table contents with `snapshot`, oldest row first.
    ///
    /// Recreates the table if the replay dropped it without a replacement.
    /// Rows that fail to insert are logged and skipped.
    pub fn replace_all(&self, snapshot: &AuditSnapshot, log: &mut OpLog) -> KeepsakeResult<AuditRestore> {
        let conn = self.db.connection();
        if !self.exists()? {
            log.warn("audit", "audit table missing after replay, recreating it");
            conn.execute_batch(&snapshot.create_sql)?;
        }

        let tx = conn.unchecked_transaction()?;
        let cleared = tx.execute(&format!("DELETE FROM {}", self.table()), [])?;
        log.debug("audit", format!("cleared {} replayed audit rows", cleared));

        let mut result = AuditRestore::default();
        for row in snapshot.rows.iter().rev() {
            let columns = row
                .values
                .iter()
                .map(|(c, _)| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = (1..=row.values.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            let insert = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(),
                columns,
                placeholders
            );

            match tx.execute(&insert, params_from_iter(row.values.iter().map(|(_, v)| v))) {
                Ok(_) => result.restored += 1,
                Err(e) => {
                    result.failed += 1;
                    log.warn("audit", format!("could not restore audit row: {}", e));
                }
            }
        }
        tx.commit()?;

        log.info(
            "audit",
            format!(
                "restored {} audit rows ({} failed)",
                result.restored, result.failed
            ),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AuditSettings {
        AuditSettings::default()
    }

    #[test]
    fn test_record_and_read_recent() {
        let db = Database::open_in_memory().unwrap();
        let settings = settings();
        let audit = AuditLog::new(&db, &settings);

        assert!(!audit.exists().unwrap());
        assert_eq!(audit.count().unwrap(), 0);

        audit.record(&AuditEntry::backup_run("database", "ok")).unwrap();
        audit
            .record(&AuditEntry::backup_deleted("db_backup_20240115_093000.sql.gz"))
            .unwrap();

        assert_eq!(audit.count().unwrap(), 2);
        let recent = audit.read_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        // same second: identity breaks the tie, newest first
        assert_eq!(recent[0].action, AuditAction::BackupDeleted);
        assert_eq!(recent[1].subject, "database");
    }

    #[test]
    fn test_snapshot_excludes_key_and_orders_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let settings = settings();
        db.connection()
            .execute_batch(
                "CREATE TABLE activity_log (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                            actor TEXT, created_at TEXT);
                 INSERT INTO activity_log (actor, created_at) VALUES ('a', '2024-01-01 00:00:00');
                 INSERT INTO activity_log (actor, created_at) VALUES ('b', '2024-03-01 00:00:00');
                 INSERT INTO activity_log (actor, created_at) VALUES ('c', '2024-02-01 00:00:00');",
            )
            .unwrap();

        let snapshot = AuditLog::new(&db, &settings).snapshot().unwrap().unwrap();
        let actors: Vec<_> = snapshot
            .rows
            .iter()
            .map(|r| r.get("actor").cloned().unwrap())
            .collect();
        assert_eq!(
            actors,
            vec![
                Value::Text("b".into()),
                Value::Text("c".into()),
                Value::Text("a".into())
            ]
        );
        assert!(snapshot.rows[0].get("id").is_none());
    }

    #[test]
    fn test_snapshot_of_missing_table() {
        let db = Database::open_in_memory().unwrap();
        let settings = settings();
        assert!(AuditLog::new(&db, &settings).snapshot().unwrap().is_none());
    }

    #[test]
    fn test_replace_all_restores_exact_rows() {
        let db = Database::open_in_memory().unwrap();
        let settings = settings();
        let audit = AuditLog::new(&db, &settings);
        for subject in ["one", "two", "three"] {
            audit.record(&AuditEntry::backup_run(subject, "ok")).unwrap();
        }
        let snapshot = audit.snapshot().unwrap().unwrap();

        // simulate a replay that brought back an older trail
        db.connection()
            .execute_batch(
                "DELETE FROM activity_log;
                 INSERT INTO activity_log (action, subject, created_at)
                 VALUES ('backup_run', 'stale', '2020-01-01 00:00:00');",
            )
            .unwrap();

        let mut log = OpLog::new("restore");
        let result = audit.replace_all(&snapshot, &mut log).unwrap();
        assert_eq!(result, AuditRestore { restored: 3, failed: 0 });

        let subjects: Vec<String> = audit
            .read_recent(10)
            .unwrap()
            .into_iter()
            .map(|e| e.subject)
            .collect();
        assert_eq!(subjects, vec!["three", "two", "one"]);
    }

    #[test]
    fn test_replace_all_recreates_dropped_table() {
        let db = Database::open_in_memory().unwrap();
        let settings = settings();
        let audit = AuditLog::new(&db, &settings);
        audit.record(&AuditEntry::backup_run("all", "ok")).unwrap();
        let snapshot = audit.snapshot().unwrap().unwrap();

        db.connection().execute_batch("DROP TABLE activity_log;").unwrap();
        let result = audit.replace_all(&snapshot, &mut OpLog::new("restore")).unwrap();

        assert_eq!(result.restored, 1);
        assert_eq!(audit.count().unwrap(), 1);
    }
}
