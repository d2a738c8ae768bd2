//! Replaying dumps into a live database
//!
//! Replay is best-effort: every statement runs on its own, and a failing
//! statement is classified by the `ReplayPolicy` and skipped. Errors that
//! match an ignorable pattern ("already exists", "duplicate") are expected
//! when a dump is replayed over a populated database; anything else is
//! counted as a failure but still does not stop the replay.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use tempfile::NamedTempFile;

use super::sql::{prepare_script, preview};
use super::Database;
use crate::backup::artifact::ArtifactFormat;
use crate::config::settings::ReplaySettings;
use crate::error::{KeepsakeError, KeepsakeResult};
use crate::logging::OpLog;

/// How a statement error is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected on re-runs; skipped quietly
    Ignorable,
    /// Recorded as a failure, then skipped
    Failure,
}

/// Classification of replay errors by message pattern
#[derive(Debug, Clone)]
pub struct ReplayPolicy {
    ignorable: Vec<String>,
}

impl ReplayPolicy {
    /// Build a policy from case-insensitive message substrings
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ignorable: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn from_settings(settings: &ReplaySettings) -> Self {
        Self::new(&settings.ignorable_errors)
    }

    pub fn classify(&self, message: &str) -> ErrorClass {
        let lower = message.to_lowercase();
        if self.ignorable.iter().any(|p| lower.contains(p.as_str())) {
            ErrorClass::Ignorable
        } else {
            ErrorClass::Failure
        }
    }
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self::from_settings(&ReplaySettings::default())
    }
}

/// One statement that failed during replay
#[derive(Debug, Clone, Serialize)]
pub struct StatementFailure {
    /// Position in the prepared statement list (0-based)
    pub index: usize,
    pub statement: String,
    pub error: String,
}

/// Counts from a replay
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub statements: usize,
    pub executed: usize,
    pub ignored: usize,
    pub failed: usize,
    pub failures: Vec<StatementFailure>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} statements: {} executed, {} ignored, {} failed",
            self.statements, self.executed, self.ignored, self.failed
        )
    }
}

/// Where the SQL text of a database artifact is read from
#[derive(Debug)]
pub enum ScriptSource {
    /// Uncompressed script read in place
    Plain(PathBuf),
    /// Compressed artifact decompressed into a temporary file
    Decompressed(NamedTempFile),
}

impl ScriptSource {
    /// Prepare the script of an artifact, decompressing `.gz` artifacts
    /// into a temporary file.
    pub fn open(artifact: &Path, format: ArtifactFormat, log: &mut OpLog) -> KeepsakeResult<Self> {
        match format {
            ArtifactFormat::SqlGz => {
                let mut temp = tempfile::Builder::new()
                    .prefix("keepsake-restore-")
                    .suffix(".sql")
                    .tempfile()
                    .map_err(|e| {
                        KeepsakeError::Io(format!("Failed to create temporary file: {}", e))
                    })?;

                let file = File::open(artifact)?;
                let mut decoder = GzDecoder::new(BufReader::new(file));
                let bytes = std::io::copy(&mut decoder, temp.as_file_mut()).map_err(|e| {
                    KeepsakeError::CorruptArtifact(format!(
                        "{} could not be decompressed: {}",
                        artifact.display(),
                        e
                    ))
                })?;
                log.info(
                    "decompress",
                    format!("decompressed {} bytes to {}", bytes, temp.path().display()),
                );
                Ok(ScriptSource::Decompressed(temp))
            }
            ArtifactFormat::Sql => {
                log.info("decompress", "artifact is uncompressed, reading directly");
                Ok(ScriptSource::Plain(artifact.to_path_buf()))
            }
            other => Err(KeepsakeError::UnsupportedArtifact(format!(
                "{} is not a SQL dump (format: {})",
                artifact.display(),
                other
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ScriptSource::Plain(path) => path,
            ScriptSource::Decompressed(temp) => temp.path(),
        }
    }

    pub fn read_to_string(&self) -> KeepsakeResult<String> {
        let mut text = String::new();
        File::open(self.path())?
            .read_to_string(&mut text)
            .map_err(|e| {
                KeepsakeError::CorruptArtifact(format!(
                    "{} is not valid UTF-8 SQL: {}",
                    self.path().display(),
                    e
                ))
            })?;
        Ok(text)
    }

    /// Delete the temporary file, if any
    pub fn cleanup(self, log: &mut OpLog) {
        if let ScriptSource::Decompressed(temp) = self {
            let path = temp.path().to_path_buf();
            match temp.close() {
                Ok(()) => log.debug("cleanup", format!("removed {}", path.display())),
                Err(e) => log.warn(
                    "cleanup",
                    format!("failed to remove {}: {}", path.display(), e),
                ),
            }
        }
    }
}

/// Replays SQL scripts against a database
pub struct DatabaseRestorer<'a> {
    db: &'a Database,
    policy: &'a ReplayPolicy,
}

impl<'a> DatabaseRestorer<'a> {
    pub fn new(db: &'a Database, policy: &'a ReplayPolicy) -> Self {
        Self { db, policy }
    }

    /// Prepare and execute every statement of `script`.
    ///
    /// Never fails as a whole; failures are reported per statement.
    pub fn replay(&self, script: &str, log: &mut OpLog) -> ReplayReport {
        let statements = prepare_script(script);
        let mut report = ReplayReport {
            statements: statements.len(),
            ..Default::default()
        };
        log.info("replay", format!("replaying {} statements", statements.len()));

        for (index, statement) in statements.iter().enumerate() {
            match self.db.connection().execute_batch(statement) {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    let message = e.to_string();
                    match self.policy.classify(&message) {
                        ErrorClass::Ignorable => {
                            report.ignored += 1;
                            log.debug(
                                "replay",
                                format!("statement {} skipped: {}", index, message),
                            );
                        }
                        ErrorClass::Failure => {
                            report.failed += 1;
                            log.warn(
                                "replay",
                                format!(
                                    "statement {} failed: {} ({})",
                                    index,
                                    message,
                                    preview(statement, 80)
                                ),
                            );
                            report.failures.push(StatementFailure {
                                index,
                                statement: preview(statement, 200),
                                error: message,
                            });
                        }
                    }
                }
            }
        }

        log.info("replay", report.summary());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::dump::write_script;
    use crate::database::test_support::seed_users_and_logs;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn dump_of_seeded_db(dir: &Path) -> String {
        let path = dir.join("source.db");
        let db = Database::open(&path, true).unwrap();
        seed_users_and_logs(&db);
        drop(db);
        let out = dir.join("dump.sql");
        write_script(&Database::open_read_only(&path).unwrap(), &out).unwrap();
        std::fs::read_to_string(out).unwrap()
    }

    #[test]
    fn test_policy_classification() {
        let policy = ReplayPolicy::default();
        assert_eq!(
            policy.classify("table users already exists"),
            ErrorClass::Ignorable
        );
        assert_eq!(
            policy.classify("Duplicate column name"),
            ErrorClass::Ignorable
        );
        assert_eq!(policy.classify("no such table: x"), ErrorClass::Failure);

        let custom = ReplayPolicy::new(["no such table", ""]);
        assert_eq!(custom.classify("no such table: x"), ErrorClass::Ignorable);
        assert_eq!(custom.classify("already exists"), ErrorClass::Failure);
    }

    #[test]
    fn test_replay_into_empty_database() {
        let temp = TempDir::new().unwrap();
        let script = dump_of_seeded_db(temp.path());

        let target = Database::open_in_memory().unwrap();
        let policy = ReplayPolicy::default();
        let mut log = OpLog::new("restore");
        target.disable_integrity().unwrap();
        let report = DatabaseRestorer::new(&target, &policy).replay(&script, &mut log);
        target.enable_integrity().unwrap();

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(target.row_count("users").unwrap(), 3);
        assert_eq!(target.row_count("logs").unwrap(), 10);
        let name: String = target
            .connection()
            .query_row("SELECT name FROM users WHERE id = 3", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "semi;colon");
    }

    #[test]
    fn test_replay_twice_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let script = dump_of_seeded_db(temp.path());

        let target = Database::open_in_memory().unwrap();
        let policy = ReplayPolicy::default();
        let restorer = DatabaseRestorer::new(&target, &policy);
        target.disable_integrity().unwrap();

        let first = restorer.replay(&script, &mut OpLog::new("restore"));
        let second = restorer.replay(&script, &mut OpLog::new("restore"));

        assert!(first.is_clean());
        assert!(second.is_clean(), "{:?}", second.failures);
        assert_eq!(target.row_count("users").unwrap(), 3);
        assert_eq!(target.row_count("logs").unwrap(), 10);
    }

    #[test]
    fn test_replay_skips_bad_statements() {
        let target = Database::open_in_memory().unwrap();
        let policy = ReplayPolicy::default();
        let script = "CREATE TABLE a (x INTEGER);\n\
                      INSERT INTO missing VALUES(1);\n\
                      CREATE INDEX i ON a(x);\n\
                      CREATE INDEX i ON a(x);\n\
                      INSERT INTO a VALUES(7);";

        let mut log = OpLog::new("restore");
        let report = DatabaseRestorer::new(&target, &policy).replay(script, &mut log);

        assert_eq!(report.statements, 6);
        assert_eq!(report.failed, 1);
        assert_eq!(report.ignored, 1);
        assert_eq!(report.executed, 4);
        assert_eq!(report.failures[0].index, 2);
        assert_eq!(target.row_count("a").unwrap(), 1);
        assert!(log.transcript().iter().any(|l| l.contains("no such table")));
    }

    #[test]
    fn test_script_source_decompresses_to_temp() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("db_backup_20240115_093000.sql.gz");
        let mut encoder = GzEncoder::new(File::create(&artifact).unwrap(), Compression::best());
        encoder.write_all(b"CREATE TABLE t (a);").unwrap();
        encoder.finish().unwrap();

        let mut log = OpLog::new("restore");
        let source = ScriptSource::open(&artifact, ArtifactFormat::SqlGz, &mut log).unwrap();
        let temp_path = source.path().to_path_buf();
        assert!(temp_path.exists());
        assert_eq!(source.read_to_string().unwrap(), "CREATE TABLE t (a);");

        source.cleanup(&mut log);
        assert!(!temp_path.exists());
    }

    #[test]
    fn test_script_source_rejects_archives() {
        let mut log = OpLog::new("restore");
        let err = ScriptSource::open(
            Path::new("storage_backup_20240115_093000.tar.gz"),
            ArtifactFormat::TarGz,
            &mut log,
        )
        .unwrap_err();
        assert!(matches!(err, KeepsakeError::UnsupportedArtifact(_)));
    }

    #[test]
    fn test_corrupt_gzip_is_reported() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("db_backup_20240115_093000.sql.gz");
        std::fs::write(&artifact, b"definitely not gzip").unwrap();

        let err = ScriptSource::open(&artifact, ArtifactFormat::SqlGz, &mut OpLog::new("restore"))
            .unwrap_err();
        assert!(matches!(err, KeepsakeError::CorruptArtifact(_)));
    }
}
