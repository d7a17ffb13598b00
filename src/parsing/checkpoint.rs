// src/parsing/checkpoint.rs

//! Persisted parser cursors.
//!
//! Each parser keeps one JSON document under the state directory:
//!
//! ```text
//! {state_dir}/
//! ├── rockclimbing.com.json
//! └── feed-3f9a0c1d.json
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};

/// Directory-backed store of parser checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Load a checkpoint, returning None if none was saved.
    pub async fn load<C: DeserializeOwned>(&self, name: &str) -> Result<Option<C>> {
        let path = self.path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Save a checkpoint atomically (write to temp, then rename).
    pub async fn save<C: Serialize + ?Sized>(&self, name: &str, checkpoint: &C) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path(name);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(checkpoint)?;

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        log::debug!("Checkpoint saved: {}", path.display());
        Ok(())
    }

    /// Remove a checkpoint; missing checkpoints are not an error.
    pub async fn clear(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Names of all saved checkpoints, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Cursor of a feed parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedCursor {
    /// Feed location the cursor belongs to
    pub source: String,

    /// Number of records already acknowledged by the writer
    pub committed: usize,

    /// Whether the last pass reached the end of the feed
    #[serde(default)]
    pub finished: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_clear() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("state"));

        assert!(store.load::<FeedCursor>("feed").await.unwrap().is_none());

        let cursor = FeedCursor {
            source: "areas.jsonl".to_string(),
            committed: 6,
            finished: false,
        };
        store.save("feed", &cursor).await.unwrap();
        assert_eq!(store.load::<FeedCursor>("feed").await.unwrap(), Some(cursor));
        assert!(!tmp.path().join("state").join("feed.json.tmp").exists());

        store.clear("feed").await.unwrap();
        store.clear("feed").await.unwrap();
        assert!(store.load::<FeedCursor>("feed").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_names() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        assert!(store.list().await.unwrap().is_empty());

        store.save("rockclimbing.com", &FeedCursor::default()).await.unwrap();
        store.save("feed-abc", &FeedCursor::default()).await.unwrap();

        assert_eq!(
            store.list().await.unwrap(),
            vec!["feed-abc".to_string(), "rockclimbing.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_dir_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
