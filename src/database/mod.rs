//! Database access for backups and restores
//!
//! Wraps a `rusqlite` connection with the catalog queries the dump and
//! replay paths need (tables, their `CREATE` text, secondary schema objects,
//! columns) and the integrity toggles used around a replay.
//!
//! - `dump`: `DatabaseArchiver` and the `DumpStrategy` implementations
//! - `replay`: `DatabaseRestorer`, script loading and error classification
//! - `sql`: escaping, statement splitting and script preparation

pub mod dump;
pub mod replay;
pub mod sql;

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::error::{KeepsakeError, KeepsakeResult};

pub use dump::{select_dump_strategy, DatabaseArchiver, DumpStrategy, DumpSummary, PortableDump, SqliteCliDump};
pub use replay::{DatabaseRestorer, ErrorClass, ReplayPolicy, ReplayReport, ScriptSource};

/// Index, view or trigger definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    /// `index`, `view` or `trigger`
    pub kind: String,
    pub name: String,
    pub sql: String,
}

/// A SQLite database connection
pub struct Database {
    conn: Connection,
    path: PathBuf,
    foreign_keys: bool,
}

impl Database {
    /// Open (or create) a database file read-write
    pub fn open(path: &Path, foreign_keys: bool) -> KeepsakeResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::configure(conn, path.to_path_buf(), foreign_keys)
    }

    /// Open an existing database file read-only (used for dumps)
    pub fn open_read_only(path: &Path) -> KeepsakeResult<Self> {
        if !path.is_file() {
            return Err(KeepsakeError::Config(format!(
                "Database file not found: {}",
                path.display()
            )));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        Self::configure(conn, path.to_path_buf(), false)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> KeepsakeResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, PathBuf::from(":memory:"), true)
    }

    fn configure(conn: Connection, path: PathBuf, foreign_keys: bool) -> KeepsakeResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(30))?;
        if foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
        Ok(Self {
            conn,
            path,
            foreign_keys,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User tables in creation order (SQLite internals excluded)
    pub fn table_names(&self) -> KeepsakeResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY rowid",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table: &str) -> KeepsakeResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Full `CREATE TABLE` text as stored by SQLite
    pub fn create_statement(&self, table: &str) -> KeepsakeResult<String> {
        let sql: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        sql.ok_or_else(|| KeepsakeError::Database(format!("No CREATE statement for table {}", table)))
    }

    /// Explicit indexes, views and triggers in creation order
    pub fn schema_objects(&self) -> KeepsakeResult<Vec<SchemaObject>> {
        let mut stmt = self.conn.prepare(
            "SELECT type, name, sql FROM sqlite_master \
             WHERE type IN ('index', 'view', 'trigger') AND sql IS NOT NULL \
             AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
             ORDER BY rowid",
        )?;
        let objects = stmt
            .query_map([], |row| {
                Ok(SchemaObject {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    sql: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(objects)
    }

    /// Column names of a table in declaration order
    pub fn table_columns(&self, table: &str) -> KeepsakeResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", sql::quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn row_count(&self, table: &str) -> KeepsakeResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", sql::quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Suspend referential checks and relax CHECK constraints for a bulk replay
    pub fn disable_integrity(&self) -> KeepsakeResult<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = OFF; PRAGMA ignore_check_constraints = ON;")?;
        Ok(())
    }

    /// Undo `disable_integrity`.
    ///
    /// Any transaction a replay left open is committed first, since SQLite
    /// ignores `PRAGMA foreign_keys` inside a transaction.
    pub fn enable_integrity(&self) -> KeepsakeResult<()> {
        self.finish_open_transaction()?;
        let foreign_keys = if self.foreign_keys { "ON" } else { "OFF" };
        self.conn.execute_batch(&format!(
            "PRAGMA ignore_check_constraints = OFF; PRAGMA foreign_keys = {};",
            foreign_keys
        ))?;
        Ok(())
    }

    /// Commit a transaction a script left open, rolling back if the commit
    /// fails. Returns whether one was open.
    pub fn finish_open_transaction(&self) -> KeepsakeResult<bool> {
        if self.conn.is_autocommit() {
            return Ok(false);
        }
        if self.conn.execute_batch("COMMIT;").is_err() {
            self.conn.execute_batch("ROLLBACK;")?;
        }
        Ok(true)
    }

    pub fn foreign_keys_enabled(&self) -> KeepsakeResult<bool> {
        let on: i64 = self.conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(on == 1)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Two tables: `users` with 3 rows and `logs` with 10 rows
    pub fn seed_users_and_logs(db: &Database) {
        db.connection()
            .execute_batch(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT);
                 CREATE TABLE logs (id INTEGER PRIMARY KEY AUTOINCREMENT,
                                    user_id INTEGER REFERENCES users(id),
                                    message TEXT, score REAL, payload BLOB);
                 CREATE INDEX idx_logs_user ON logs(user_id);
                 INSERT INTO users VALUES (1, 'Ada', 'ada@example.com');
                 INSERT INTO users VALUES (2, 'O''Brien', NULL);
                 INSERT INTO users VALUES (3, 'semi;colon', 'x@example.com');",
            )
            .unwrap();
        for i in 0..10 {
            db.connection()
                .execute(
                    "INSERT INTO logs (user_id, message, score, payload) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        (i % 3) + 1,
                        format!("event {}", i),
                        i as f64 * 1.5,
                        vec![i as u8, 0xff]
                    ],
                )
                .unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::seed_users_and_logs;
    use super::*;

    #[test]
    fn test_catalog_queries() {
        let db = Database::open_in_memory().unwrap();
        seed_users_and_logs(&db);

        assert_eq!(db.table_names().unwrap(), vec!["users", "logs"]);
        assert!(db.table_exists("users").unwrap());
        assert!(!db.table_exists("missing").unwrap());
        assert_eq!(db.row_count("logs").unwrap(), 10);
        assert!(db.create_statement("users").unwrap().starts_with("CREATE TABLE users"));
        assert_eq!(
            db.table_columns("users").unwrap(),
            vec!["id", "name", "email"]
        );

        let objects = db.schema_objects().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].kind, "index");
        assert_eq!(objects[0].name, "idx_logs_user");
    }

    #[test]
    fn test_integrity_toggle() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.foreign_keys_enabled().unwrap());

        db.disable_integrity().unwrap();
        assert!(!db.foreign_keys_enabled().unwrap());

        db.connection().execute_batch("BEGIN;").unwrap();
        db.enable_integrity().unwrap();
        assert!(db.foreign_keys_enabled().unwrap());
        assert!(db.connection().is_autocommit());
    }

    #[test]
    fn test_open_read_only_requires_existing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = Database::open_read_only(&temp.path().join("nope.db")).err().unwrap();
        assert!(matches!(err, KeepsakeError::Config(_)));
    }
}
