//! Audit sinks.
//!
//! A sink receives one line-delimited canonical JSON record per event.
//! Sink failures are reported to the caller as [`AuditError::Sink`] but the
//! trail logs and swallows them; they never fail a request.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink rejected the record
    #[error("Audit sink unavailable: {0}")]
    Sink(String),

    /// The event could not be serialized
    #[error("Failed to serialize audit event: {0}")]
    Serialize(String),

    /// Strict compliance mode rejected an event missing metadata
    #[error("Event rejected by strict compliance mode: {0}")]
    StrictMode(String),
}

/// Destination for serialized audit records.
pub trait AuditSink: Send + Sync {
    /// Append one record. Must not block beyond the audit sink budget.
    fn emit(&self, line: &str) -> Result<(), AuditError>;

    /// Flush buffered records. Called during graceful shutdown.
    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Sink that keeps records in memory. The default, and the test sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, line: &str) -> Result<(), AuditError> {
        let mut guard = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(line.to_string());
        Ok(())
    }
}

/// Sink that writes one line per event to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl AuditSink for StdoutSink {
    fn emit(&self, line: &str) -> Result<(), AuditError> {
        let stdout = std::io::stdout();
        let mut guard = stdout.lock();
        writeln!(guard, "{}", line).map_err(|e| AuditError::Sink(e.to_string()))
    }
}

/// Sink that appends to a file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl FileSink {
    /// Open (or create) the audit log file in append mode.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError::Sink(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn emit(&self, line: &str) -> Result<(), AuditError> {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(guard, "{}", line).map_err(|e| AuditError::Sink(e.to_string()))
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.flush().map_err(|e| AuditError::Sink(e.to_string()))
    }
}
