//! Logging for keepsake
//!
//! Two pieces: `init_tracing` installs the `tracing` subscriber for the
//! binary, and `OpLog` is the explicit per-operation logging context that is
//! threaded through every archiver and restorer call. Each `OpLog` event is
//! emitted as a structured `tracing` event (operation, artifact id, path,
//! step) and also appended to a transcript the caller can hand back to the
//! user.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing_subscriber::{fmt as tfmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the verbosity-derived filter.
pub fn init_tracing(verbose: u8, quiet: bool, json: bool) {
    if quiet {
        return;
    }

    let filter = match verbose {
        0 => "warn,keepsake=info",
        1 => "info,keepsake=debug",
        2 => "debug,keepsake=trace",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tfmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tfmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Severity of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        })
    }
}

/// Explicit logging context for one backup/restore operation
#[derive(Debug, Clone)]
pub struct OpLog {
    operation: &'static str,
    artifact_id: Option<String>,
    path: Option<PathBuf>,
    transcript: Vec<String>,
}

impl OpLog {
    /// Context for an operation that is not tied to one artifact yet
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            artifact_id: None,
            path: None,
            transcript: Vec::new(),
        }
    }

    /// Attach the artifact id
    pub fn with_artifact(mut self, id: impl Into<String>) -> Self {
        self.artifact_id = Some(id.into());
        self
    }

    /// Attach the path being worked on
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Point the context at a different path mid-operation
    pub fn set_path(&mut self, path: &Path) {
        self.path = Some(path.to_path_buf());
    }

    pub fn debug(&mut self, step: &str, message: impl AsRef<str>) {
        self.emit(LogLevel::Debug, step, message.as_ref());
    }

    pub fn info(&mut self, step: &str, message: impl AsRef<str>) {
        self.emit(LogLevel::Info, step, message.as_ref());
    }

    pub fn warn(&mut self, step: &str, message: impl AsRef<str>) {
        self.emit(LogLevel::Warn, step, message.as_ref());
    }

    pub fn error(&mut self, step: &str, message: impl AsRef<str>) {
        self.emit(LogLevel::Error, step, message.as_ref());
    }

    /// Lines recorded so far
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    pub fn into_transcript(self) -> Vec<String> {
        self.transcript
    }

    fn emit(&mut self, level: LogLevel, step: &str, message: &str) {
        let artifact_id = self.artifact_id.as_deref().unwrap_or("-");
        let path = self
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());

        match level {
            LogLevel::Debug => tracing::debug!(
                operation = self.operation,
                artifact_id,
                path = %path,
                step,
                "{}",
                message
            ),
            LogLevel::Info => tracing::info!(
                operation = self.operation,
                artifact_id,
                path = %path,
                step,
                "{}",
                message
            ),
            LogLevel::Warn => tracing::warn!(
                operation = self.operation,
                artifact_id,
                path = %path,
                step,
                "{}",
                message
            ),
            LogLevel::Error => tracing::error!(
                operation = self.operation,
                artifact_id,
                path = %path,
                step,
                "{}",
                message
            ),
        }

        self.transcript
            .push(format!("{:<5} [{}] {}", level, step, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_records_every_level() {
        let mut log = OpLog::new("restore").with_artifact("abc").with_path("/tmp/x");
        log.debug("decompress", "reading");
        log.info("replay", "12 statements");
        log.warn("replay", "statement 3 failed");
        log.error("enable_integrity", "pragma failed");

        let lines = log.transcript();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("DEBUG [decompress]"));
        assert!(lines[1].contains("12 statements"));
        assert!(lines[2].starts_with("WARN "));
        assert!(lines[3].starts_with("ERROR [enable_integrity]"));
    }

    #[test]
    fn test_set_path_keeps_transcript() {
        let mut log = OpLog::new("backup");
        log.info("dump", "start");
        log.set_path(Path::new("/srv/backups/db_backup_20240101_000000.sql.gz"));
        log.info("compress", "done");
        assert_eq!(log.into_transcript(), vec!["INFO  [dump] start", "INFO  [compress] done"]);
    }
}
