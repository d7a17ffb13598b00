// src/storage/mod.rs

//! Area persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── .lock                 # Held by the active writer
//! ├── .journal              # Targets of a chunk being committed
//! ├── areas/                # One document per area, named by area id
//! │   └── 3f2a9c0d1b7e4a55.json
//! ├── state/                # Parser checkpoints
//! │   └── rockclimbing.com.json
//! └── errorlog.txt
//! ```

pub mod dump;
pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Area;

pub use dump::{AreaDump, DumpSummary, dump};
pub use local::{LocalStorage, LocalWriter};

/// Directory holding area documents.
pub const AREAS_DIR: &str = "areas";

/// Lock file held while a writer is open.
pub const LOCK_FILE: &str = ".lock";

/// Commit journal present while a chunk is being renamed into place.
pub const JOURNAL_FILE: &str = ".journal";

/// Outcome of writing one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Areas not stored before
    pub inserted: usize,
    /// Areas that replaced a stored document
    pub updated: usize,
}

impl WriteSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Persists chunks of areas by key.
#[async_trait]
pub trait AreaWriter: Send {
    /// Upsert every area of the chunk, all or nothing.
    async fn write(&mut self, areas: &[Area]) -> Result<WriteSummary>;

    /// Release the storage handle. Further writes fail.
    async fn close(&mut self) -> Result<()>;
}

/// Opens writers for one storage backend.
#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AreaWriter>>;
}
