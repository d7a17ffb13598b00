// src/storage/local.rs

//! Local filesystem storage.
//!
//! Areas are stored as pretty JSON documents under `areas/`. A chunk is
//! first staged to temporary files next to their targets and only renamed
//! into place once every record of the chunk was staged. While renaming,
//! the chunk's targets are listed in a commit journal and every replaced
//! document is kept as a `.bak` file, so a commit that fails or never
//! finishes is rolled back to the state before the chunk.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::Area;
use crate::storage::{AREAS_DIR, AreaWriter, JOURNAL_FILE, LOCK_FILE, WriteSummary, WriterFactory};

/// Attempts per file operation before giving up.
const IO_ATTEMPTS: u32 = 5;

/// Delay between attempts.
const IO_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Errors that another attempt will not fix.
fn is_permanent(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::AlreadyExists
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidData
            | ErrorKind::IsADirectory
    )
}

/// Run a file operation, retrying transient failures.
async fn with_retry<T, F, Fut>(operation: &str, path: &Path, mut call: F) -> std::io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < IO_ATTEMPTS && !is_permanent(&e) => {
                log::debug!(
                    "{} {} failed (attempt {}/{}): {}",
                    operation,
                    path.display(),
                    attempt,
                    IO_ATTEMPTS,
                    e
                );
                tokio::time::sleep(IO_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

const STAGING_SUFFIX: &str = ".json.tmp";
const BACKUP_SUFFIX: &str = ".json.bak";

fn staging_path(target: &Path) -> PathBuf {
    target.with_extension("json.tmp")
}

fn backup_path(target: &Path) -> PathBuf {
    target.with_extension("json.bak")
}

/// One target of the chunk being committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JournalEntry {
    target: PathBuf,
    /// Whether a document was stored there before the chunk
    existed: bool,
}

/// Put a target back into its state before the chunk.
async fn restore(entry: &JournalEntry) -> std::io::Result<()> {
    if entry.existed {
        let backup = backup_path(&entry.target);
        if tokio::fs::try_exists(&backup).await? {
            tokio::fs::rename(&backup, &entry.target).await?;
        }
        return Ok(());
    }
    match tokio::fs::remove_file(&entry.target).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn areas_dir(&self) -> PathBuf {
        self.root_dir.join(AREAS_DIR)
    }

    /// Document path of an area id.
    pub fn area_path(&self, id: &str) -> PathBuf {
        self.areas_dir().join(format!("{id}.json"))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root_dir.join(LOCK_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root_dir.join(JOURNAL_FILE)
    }

    async fn save_journal(&self, entries: &[JournalEntry]) -> std::io::Result<()> {
        let bytes = serde_json::to_vec(entries)?;
        let path = self.journal_path();
        let staging = path.with_extension("tmp");
        write_file(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &path).await
    }

    /// Roll back a commit that never finished, then remove leftover
    /// staging and backup files.
    async fn recover(&self) -> Result<()> {
        let journal = self.journal_path();
        match tokio::fs::read(&journal).await {
            Ok(bytes) => {
                let entries: Vec<JournalEntry> = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::persistence(format!(
                        "unreadable commit journal {}: {e}",
                        journal.display()
                    ))
                })?;
                log::warn!("Rolling back an unfinished commit of {} areas", entries.len());
                for entry in entries.iter().rev() {
                    restore(entry).await.map_err(|e| {
                        AppError::persistence_from(
                            format!("cannot restore {}", entry.target.display()),
                            e.into(),
                        )
                    })?;
                }
                tokio::fs::remove_file(&journal).await.map_err(|e| {
                    AppError::persistence_from("cannot remove commit journal", e.into())
                })?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::persistence_from("cannot read commit journal", e.into()));
            }
        }

        let mut listing = match tokio::fs::read_dir(self.areas_dir()).await {
            Ok(listing) => listing,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(AppError::Io(e)),
        };
        while let Some(entry) = listing.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.ends_with(STAGING_SUFFIX) || name.ends_with(BACKUP_SUFFIX)) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            log::debug!("Removing leftover {}", entry.path().display());
            tokio::fs::remove_file(entry.path()).await?;
        }
        Ok(())
    }

    /// Paths of every stored area document.
    async fn documents(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(self.areas_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Number of stored areas.
    pub async fn count_areas(&self) -> Result<usize> {
        Ok(self.documents().await?.len())
    }

    /// Load one area by its key.
    pub async fn load_area(&self, key: &str) -> Result<Option<Area>> {
        let mut lookup = Area {
            key: key.to_string(),
            ..Area::default()
        };
        lookup.normalize();

        match tokio::fs::read(self.area_path(&lookup.id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Load every stored area, ordered by key.
    pub async fn load_areas(&self) -> Result<Vec<Area>> {
        let mut areas = Vec::new();
        for path in self.documents().await? {
            let bytes = tokio::fs::read(&path).await?;
            let area: Area = serde_json::from_slice(&bytes).map_err(|e| {
                AppError::persistence(format!("unreadable area document {}: {e}", path.display()))
            })?;
            areas.push(area);
        }
        areas.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(areas)
    }
}

#[async_trait]
impl WriterFactory for LocalStorage {
    async fn open(&self) -> Result<Box<dyn AreaWriter>> {
        Ok(Box::new(LocalWriter::acquire(self.clone()).await?))
    }
}

/// A document ready to be staged.
struct Prepared {
    key: String,
    target: PathBuf,
    staging: PathBuf,
    bytes: Vec<u8>,
}

/// Writer holding the storage lock until closed or dropped.
#[derive(Debug)]
pub struct LocalWriter {
    storage: LocalStorage,
    lock: Option<PathBuf>,
}

impl LocalWriter {
    /// Take the storage lock. Fails if another writer holds it.
    pub async fn acquire(storage: LocalStorage) -> Result<Self> {
        tokio::fs::create_dir_all(storage.areas_dir())
            .await
            .map_err(|e| AppError::persistence_from("cannot create storage directory", e.into()))?;

        let lock = storage.lock_path();
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(AppError::persistence(format!(
                    "storage {} is locked by another run (remove {} if that run is gone)",
                    storage.root_dir().display(),
                    lock.display()
                )));
            }
            Err(e) => {
                return Err(AppError::persistence_from("cannot create lock file", e.into()));
            }
        };

        let owner = format!("pid {} since {}\n", std::process::id(), Utc::now().to_rfc3339());
        file.write_all(owner.as_bytes()).await?;
        log::debug!("Acquired {}", lock.display());

        let writer = Self {
            storage,
            lock: Some(lock),
        };
        writer.storage.recover().await?;
        Ok(writer)
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    fn prepare(&self, areas: &[Area]) -> Result<Vec<Prepared>> {
        let mut prepared: Vec<Prepared> = Vec::with_capacity(areas.len());
        let mut by_key: HashMap<String, usize> = HashMap::new();

        for area in areas {
            let mut area = area.clone();
            area.key = area.key.trim().to_string();
            if area.key.is_empty() {
                return Err(AppError::persistence(format!(
                    "area '{}' has no key",
                    area.name
                )));
            }
            if area.name.trim().is_empty() {
                return Err(AppError::persistence(format!(
                    "area '{}' has no name",
                    area.key
                )));
            }
            area.normalize();

            let bytes = serde_json::to_vec_pretty(&area).map_err(|e| {
                AppError::persistence_from(format!("cannot serialize area '{}'", area.key), e.into())
            })?;
            let target = self.storage.area_path(&area.id);
            let record = Prepared {
                staging: staging_path(&target),
                target,
                key: area.key,
                bytes,
            };

            // The last occurrence of a key within a chunk wins.
            match by_key.get(&record.key) {
                Some(&index) => prepared[index] = record,
                None => {
                    by_key.insert(record.key.clone(), prepared.len());
                    prepared.push(record);
                }
            }
        }

        Ok(prepared)
    }

    async fn discard(records: &[Prepared]) {
        for record in records {
            match tokio::fs::remove_file(&record.staging).await {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    log::warn!("Failed to remove staged file {}: {}", record.staging.display(), e);
                }
                _ => {}
            }
        }
    }

    async fn stage(&self, prepared: &[Prepared]) -> Result<()> {
        for (index, record) in prepared.iter().enumerate() {
            let outcome = with_retry("stage", &record.staging, || {
                write_file(&record.staging, &record.bytes)
            })
            .await;
            if let Err(e) = outcome {
                Self::discard(&prepared[..=index]).await;
                return Err(AppError::persistence_from(
                    format!("cannot stage area '{}'", record.key),
                    e.into(),
                ));
            }
        }
        Ok(())
    }

    /// Move the stored document aside, then rename the staged one into place.
    async fn replace(record: &Prepared, existed: bool) -> std::io::Result<()> {
        let backup = backup_path(&record.target);
        if existed {
            with_retry("back up", &record.target, || {
                tokio::fs::rename(&record.target, &backup)
            })
            .await?;
        }
        let outcome = with_retry("commit", &record.target, || {
            tokio::fs::rename(&record.staging, &record.target)
        })
        .await;
        if outcome.is_err() && existed {
            if let Err(e) = tokio::fs::rename(&backup, &record.target).await {
                log::warn!("Failed to restore {}: {}", record.target.display(), e);
            }
        }
        outcome
    }

    /// Undo replaced targets, newest first. The journal stays behind when a
    /// target cannot be restored so the next writer finishes the rollback.
    async fn rollback(&self, entries: &[JournalEntry]) {
        let mut clean = true;
        for entry in entries.iter().rev() {
            if let Err(e) = restore(entry).await {
                log::warn!("Failed to restore {}: {}", entry.target.display(), e);
                clean = false;
            }
        }
        if clean {
            let journal = self.storage.journal_path();
            match tokio::fs::remove_file(&journal).await {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    log::warn!("Failed to remove {}: {}", journal.display(), e);
                }
                _ => {}
            }
        }
    }

    async fn commit(&self, prepared: &[Prepared]) -> Result<WriteSummary> {
        let mut journal = Vec::with_capacity(prepared.len());
        for record in prepared {
            journal.push(JournalEntry {
                target: record.target.clone(),
                existed: tokio::fs::try_exists(&record.target).await.unwrap_or(false),
            });
        }

        let journal_path = self.storage.journal_path();
        if let Err(e) = with_retry("journal", &journal_path, || self.storage.save_journal(&journal)).await
        {
            Self::discard(prepared).await;
            return Err(AppError::persistence_from("cannot write commit journal", e.into()));
        }

        for (index, (record, entry)) in prepared.iter().zip(&journal).enumerate() {
            if let Err(e) = Self::replace(record, entry.existed).await {
                Self::discard(&prepared[index..]).await;
                self.rollback(&journal[..index]).await;
                return Err(AppError::persistence_from(
                    format!("cannot commit area '{}'", record.key),
                    e.into(),
                ));
            }
        }

        // Removing the journal is the commit point.
        if let Err(e) = tokio::fs::remove_file(&journal_path).await {
            self.rollback(&journal).await;
            return Err(AppError::persistence_from("cannot finish commit", e.into()));
        }
        for entry in journal.iter().filter(|entry| entry.existed) {
            let backup = backup_path(&entry.target);
            if let Err(e) = tokio::fs::remove_file(&backup).await {
                log::warn!("Failed to remove backup {}: {}", backup.display(), e);
            }
        }

        let updated = journal.iter().filter(|entry| entry.existed).count();
        Ok(WriteSummary {
            inserted: journal.len() - updated,
            updated,
        })
    }
}

#[async_trait]
impl AreaWriter for LocalWriter {
    async fn write(&mut self, areas: &[Area]) -> Result<WriteSummary> {
        if self.lock.is_none() {
            return Err(AppError::persistence("writer is closed"));
        }
        if areas.is_empty() {
            return Ok(WriteSummary::default());
        }
        if tokio::fs::try_exists(self.storage.journal_path()).await.unwrap_or(false) {
            self.storage.recover().await?;
        }

        let prepared = self.prepare(areas)?;
        self.stage(&prepared).await?;
        let summary = self.commit(&prepared).await?;

        log::debug!(
            "Stored {} areas ({} new, {} updated)",
            summary.total(),
            summary.inserted,
            summary.updated
        );
        Ok(summary)
    }

    /// Roll back a write that was abandoned mid-commit, then release the lock.
    async fn close(&mut self) -> Result<()> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };
        let recovered = self.storage.recover().await;

        match tokio::fs::remove_file(&lock).await {
            Ok(()) => log::debug!("Released {}", lock.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::persistence_from("cannot release lock file", e.into()));
            }
        }
        recovered
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(e) = std::fs::remove_file(&lock) {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("Failed to release {}: {}", lock.display(), e);
                }
            }
        }
    }
}
