// src/utils/log.rs

//! Append-only error log.
//!
//! Every entry is one line of the form `<timestamp>: <text>`. The log is
//! best-effort: a failing write is reported through the `log` facade and
//! otherwise ignored, so logging can never fail a run.

use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

/// Timestamp format used for entries.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sink for run-level failures.
pub trait ErrorLog: Send + Sync {
    /// Append a plain message.
    fn write_message(&self, message: &str);

    /// Append an error with its source chain.
    fn write_error(&self, error: &dyn Error) {
        self.write_message(&render_error(error));
    }
}

/// Render an error as `message (inner message) (inner message) ...`,
/// following the whole source chain down to the root cause.
pub fn render_error(error: &dyn Error) -> String {
    let mut text = error.to_string();

    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(&format!(" ({inner})"));
        source = inner.source();
    }

    text
}

fn format_entry(message: &str) -> String {
    format!("{}: {}\n", Local::now().format(TIMESTAMP_FORMAT), message)
}

/// Error log appending to a file.
pub struct FileErrorLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.as_bytes())
    }
}

impl ErrorLog for FileErrorLog {
    fn write_message(&self, message: &str) {
        let entry = format_entry(message);
        // A poisoned lock only means another writer panicked mid-append.
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.append(&entry) {
            log::warn!("Failed to write error log {}: {}", self.path.display(), e);
        }
    }
}

/// Error log kept in memory.
#[derive(Default)]
pub struct MemoryErrorLog {
    entries: Mutex<Vec<String>>,
}

impl MemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries written so far, without timestamps.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl ErrorLog for MemoryErrorLog {
    fn write_message(&self, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(message.to_string());
        }
    }
}
