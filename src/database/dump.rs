//! Database dumps
//!
//! `DatabaseArchiver` writes a database backup through a `DumpStrategy`.
//! The strategy is picked once, when the archiver is built, by
//! `select_dump_strategy`:
//!
//! - `PortableDump` runs in-process and is always available. It writes an
//!   uncompressed script next to the target, then stream-compresses it.
//! - `SqliteCliDump` pipes `sqlite3 <db> .dump` straight into the gzip
//!   encoder. Used when the binary is found on `PATH`.
//!
//! Both write to a hidden partial file and rename it into place, so a
//! failed dump never leaves a file that looks like a finished artifact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;

use super::sql::{quote_ident, render_value};
use super::Database;
use crate::backup::artifact::{artifact_filename, partial_path, ArtifactFormat, ArtifactKind};
use crate::config::settings::{DatabaseSettings, DumpStrategyKind};
use crate::error::{KeepsakeError, KeepsakeResult};
use crate::logging::OpLog;

/// Chunk size used when stream-compressing a script
pub const COMPRESSION_CHUNK_SIZE: usize = 1024 * 1024;

/// Outcome of a dump
#[derive(Debug, Clone)]
pub struct DumpSummary {
    /// Final artifact path
    pub path: PathBuf,
    /// Size of the final artifact in bytes
    pub size: u64,
    /// Tables dumped (unknown for external tools)
    pub tables: Option<usize>,
    /// Rows dumped (unknown for external tools)
    pub rows: Option<u64>,
    /// Strategy that produced it
    pub strategy: &'static str,
}

/// A way of producing a SQL dump of a database file
pub trait DumpStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Dump `database` into `output`, gzip-compressed when `compress` is set
    fn dump(
        &self,
        database: &Path,
        output: &Path,
        compress: bool,
        log: &mut OpLog,
    ) -> KeepsakeResult<DumpSummary>;
}

/// Pick the dump strategy for this host.
///
/// `auto` and `external` probe for the `sqlite3` binary; when it is missing
/// both fall back to the portable dump.
pub fn select_dump_strategy(settings: &DatabaseSettings) -> Box<dyn DumpStrategy> {
    match settings.dump_strategy {
        DumpStrategyKind::Portable => Box::new(PortableDump),
        kind => match which::which("sqlite3") {
            Ok(binary) => {
                tracing::debug!(binary = %binary.display(), "using external sqlite3 dump");
                Box::new(SqliteCliDump::new(binary))
            }
            Err(e) => {
                if kind == DumpStrategyKind::External {
                    tracing::warn!(
                        error = %e,
                        "sqlite3 binary not found, falling back to portable dump"
                    );
                }
                Box::new(PortableDump)
            }
        },
    }
}

/// Produces database artifacts in the backup directory
pub struct DatabaseArchiver {
    database: PathBuf,
    compress: bool,
    strategy: Box<dyn DumpStrategy>,
}

impl DatabaseArchiver {
    pub fn new(database: PathBuf, compress: bool, strategy: Box<dyn DumpStrategy>) -> Self {
        Self {
            database,
            compress,
            strategy,
        }
    }

    /// Filename of the artifact a run at `timestamp` would produce
    pub fn artifact_filename(&self, timestamp: DateTime<Utc>) -> String {
        let format = if self.compress {
            ArtifactFormat::SqlGz
        } else {
            ArtifactFormat::Sql
        };
        artifact_filename(ArtifactKind::Database, timestamp, format)
    }

    /// Number of tables a dump would cover (for dry runs)
    pub fn count_tables(&self) -> KeepsakeResult<usize> {
        let db = Database::open_read_only(&self.database)?;
        Ok(db.table_names()?.len())
    }

    /// Dump the database into `backup_dir`
    pub fn archive(
        &self,
        backup_dir: &Path,
        timestamp: DateTime<Utc>,
        log: &mut OpLog,
    ) -> KeepsakeResult<DumpSummary> {
        if !self.database.is_file() {
            return Err(KeepsakeError::Config(format!(
                "Database file not found: {}",
                self.database.display()
            )));
        }

        let output = backup_dir.join(self.artifact_filename(timestamp));
        log.set_path(&output);
        log.info(
            "dump",
            format!(
                "dumping {} with {} strategy",
                self.database.display(),
                self.strategy.name()
            ),
        );

        let summary = self
            .strategy
            .dump(&self.database, &output, self.compress, log)?;
        log.info("dump", format!("wrote {} bytes", summary.size));
        Ok(summary)
    }
}

/// In-process dump: always available
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableDump;

impl DumpStrategy for PortableDump {
    fn name(&self) -> &'static str {
        "portable"
    }

    fn dump(
        &self,
        database: &Path,
        output: &Path,
        compress: bool,
        log: &mut OpLog,
    ) -> KeepsakeResult<DumpSummary> {
        let db = Database::open_read_only(database)?;
        let intermediate = partial_path(output, "sql.tmp");

        let (tables, rows) = match write_script(&db, &intermediate) {
            Ok(counts) => counts,
            Err(e) => {
                let _ = fs::remove_file(&intermediate);
                return Err(e);
            }
        };
        log.debug(
            "dump",
            format!("script covers {} tables and {} rows", tables, rows),
        );

        if compress {
            if let Err(e) = compress_file(&intermediate, output, log) {
                let _ = fs::remove_file(&intermediate);
                return Err(e);
            }
        } else {
            fs::rename(&intermediate, output).map_err(|e| {
                let _ = fs::remove_file(&intermediate);
                KeepsakeError::Io(format!("Failed to move dump into place: {}", e))
            })?;
        }

        Ok(DumpSummary {
            path: output.to_path_buf(),
            size: fs::metadata(output)?.len(),
            tables: Some(tables),
            rows: Some(rows),
            strategy: self.name(),
        })
    }
}

/// Write the full schema and data of `db` as a replayable script.
///
/// Per table: `DROP TABLE IF EXISTS`, its `CREATE TABLE`, then if it has
/// rows a `BEGIN IMMEDIATE` / one `INSERT` per row / `COMMIT` block.
/// Indexes, views and triggers follow the data.
pub fn write_script(db: &Database, path: &Path) -> KeepsakeResult<(usize, u64)> {
    let file = File::create(path)
        .map_err(|e| KeepsakeError::Io(format!("Failed to create dump file: {}", e)))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "-- keepsake database dump")?;
    writeln!(out, "-- Source: {}", db.path().display())?;
    writeln!(out, "-- Created: {}", Utc::now().to_rfc3339())?;
    writeln!(out)?;

    let tables = db.table_names()?;
    let mut total_rows = 0u64;

    for table in &tables {
        let ident = quote_ident(table);
        writeln!(out, "DROP TABLE IF EXISTS {};", ident)?;
        writeln!(out, "{};", db.create_statement(table)?)?;

        let mut stmt = db.connection().prepare(&format!("SELECT * FROM {}", ident))?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut table_rows = 0u64;

        while let Some(row) = rows.next()? {
            if table_rows == 0 {
                writeln!(out, "BEGIN IMMEDIATE;")?;
            }
            let values = (0..column_count)
                .map(|i| row.get_ref(i).map(render_value))
                .collect::<Result<Vec<_>, _>>()?;
            writeln!(out, "INSERT INTO {} VALUES({});", ident, values.join(","))?;
            table_rows += 1;
        }

        if table_rows > 0 {
            writeln!(out, "COMMIT;")?;
        }
        writeln!(out)?;
        total_rows += table_rows;
    }

    for object in db.schema_objects()? {
        let kind = object.kind.to_ascii_uppercase();
        writeln!(out, "DROP {} IF EXISTS {};", kind, quote_ident(&object.name))?;
        writeln!(out, "{};", object.sql)?;
    }

    let file = out
        .into_inner()
        .map_err(|e| KeepsakeError::Io(format!("Failed to flush dump file: {}", e)))?;
    file.sync_all()?;

    Ok((tables.len(), total_rows))
}

/// Gzip `source` into `target` in fixed-size chunks at maximum compression.
///
/// The compressed data goes to a hidden partial file that is renamed into
/// place; `source` is deleted only once `target` is confirmed to exist.
pub fn compress_file(source: &Path, target: &Path, log: &mut OpLog) -> KeepsakeResult<u64> {
    let partial = partial_path(target, "partial");

    let result = (|| -> KeepsakeResult<u64> {
        let mut reader = BufReader::new(File::open(source)?);
        let mut encoder = GzEncoder::new(File::create(&partial)?, Compression::best());
        let mut buffer = vec![0u8; COMPRESSION_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            encoder.write_all(&buffer[..read])?;
            total += read as u64;
        }

        let file = encoder.finish()?;
        file.sync_all()?;
        fs::rename(&partial, target)?;
        Ok(total)
    })();

    let total = match result {
        Ok(total) => total,
        Err(e) => {
            let _ = fs::remove_file(&partial);
            return Err(KeepsakeError::Io(format!("Failed to compress dump: {}", e)));
        }
    };

    if !target.is_file() {
        return Err(KeepsakeError::Io(format!(
            "Compressed dump missing after write: {}",
            target.display()
        )));
    }

    fs::remove_file(source)?;
    log.debug(
        "compress",
        format!("compressed {} bytes into {}", total, target.display()),
    );
    Ok(total)
}

/// Dump through the `sqlite3` command-line shell
#[derive(Debug, Clone)]
pub struct SqliteCliDump {
    binary: PathBuf,
}

impl SqliteCliDump {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

impl DumpStrategy for SqliteCliDump {
    fn name(&self) -> &'static str {
        "sqlite3-cli"
    }

    fn dump(
        &self,
        database: &Path,
        output: &Path,
        compress: bool,
        log: &mut OpLog,
    ) -> KeepsakeResult<DumpSummary> {
        let partial = partial_path(output, "partial");

        // stderr goes to a file so a chatty sqlite3 can never block on it
        let mut stderr_file = tempfile::tempfile()
            .map_err(|e| KeepsakeError::Io(format!("Failed to create stderr capture: {}", e)))?;
        let stderr_sink = stderr_file
            .try_clone()
            .map_err(|e| KeepsakeError::Io(format!("Failed to create stderr capture: {}", e)))?;

        let mut child = Command::new(&self.binary)
            .arg(database)
            .arg(".dump")
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr_sink))
            .spawn()
            .map_err(|e| {
                KeepsakeError::ToolUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        let piped = match child.stdout.take() {
            Some(mut stdout) => (|| -> std::io::Result<u64> {
                let file = File::create(&partial)?;
                if compress {
                    let mut encoder = GzEncoder::new(file, Compression::best());
                    let copied = std::io::copy(&mut stdout, &mut encoder)?;
                    encoder.finish()?.sync_all()?;
                    Ok(copied)
                } else {
                    let mut writer = BufWriter::new(file);
                    let copied = std::io::copy(&mut stdout, &mut writer)?;
                    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
                    Ok(copied)
                }
            })(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "sqlite3 stdout was not captured",
            )),
        };

        let finished = child.wait();

        let failure = match (&piped, &finished) {
            (Err(e), _) => Some(format!("failed to capture dump output: {}", e)),
            (_, Err(e)) => Some(format!("failed to wait for sqlite3: {}", e)),
            (_, Ok(status)) if !status.success() => Some(format!(
                "sqlite3 exited with {}: {}",
                status,
                read_captured(&mut stderr_file).trim()
            )),
            _ => None,
        };

        if let Some(message) = failure {
            let _ = fs::remove_file(&partial);
            log.error("dump", &message);
            return Err(KeepsakeError::Database(message));
        }

        fs::rename(&partial, output).map_err(|e| {
            let _ = fs::remove_file(&partial);
            KeepsakeError::Io(format!("Failed to move dump into place: {}", e))
        })?;

        let copied = piped.unwrap_or(0);
        log.debug("dump", format!("sqlite3 produced {} bytes of SQL", copied));

        Ok(DumpSummary {
            path: output.to_path_buf(),
            size: fs::metadata(output)?.len(),
            tables: None,
            rows: None,
            strategy: self.name(),
        })
    }
}

/// Contents of a captured output file, lossily decoded
fn read_captured(file: &mut File) -> String {
    let mut bytes = Vec::new();
    match file.seek(SeekFrom::Start(0)).and_then(|_| file.read_to_end(&mut bytes)) {
        Ok(_) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("<stderr unavailable: {}>", e),
    }
}
