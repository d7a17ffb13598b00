//! End-to-end passes over a JSON Lines feed through the driver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aggregator::error::{AppError, FailureKind, Result};
use aggregator::models::{Area, Config, ExtendedSettings};
use aggregator::parsing::{CheckpointStore, FeedCursor, ParserDeps, ParserRegistry};
use aggregator::pipeline::{
    DriveOutcome, Driver, DriverState, RunRequest, SinglePass, WorkerOptions,
};
use aggregator::storage::{AreaWriter, LocalStorage, WriteSummary, WriterFactory};
use aggregator::utils::log::MemoryErrorLog;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Local storage that records every chunk and fails the write with the
/// given zero-based index.
struct RecordingStorage {
    inner: LocalStorage,
    fail_on: Option<usize>,
    writes: Arc<AtomicUsize>,
    chunks: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordingStorage {
    fn new(root: &std::path::Path, fail_on: Option<usize>) -> Self {
        Self {
            inner: LocalStorage::new(root),
            fail_on,
            writes: Arc::new(AtomicUsize::new(0)),
            chunks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn chunks(&self) -> Vec<Vec<String>> {
        self.chunks.lock().unwrap().clone()
    }
}

struct RecordingWriter {
    inner: Box<dyn AreaWriter>,
    fail_on: Option<usize>,
    writes: Arc<AtomicUsize>,
    chunks: Arc<Mutex<Vec<Vec<String>>>>,
}

#[async_trait]
impl WriterFactory for RecordingStorage {
    async fn open(&self) -> Result<Box<dyn AreaWriter>> {
        Ok(Box::new(RecordingWriter {
            inner: self.inner.open().await?,
            fail_on: self.fail_on,
            writes: self.writes.clone(),
            chunks: self.chunks.clone(),
        }))
    }
}

#[async_trait]
impl AreaWriter for RecordingWriter {
    async fn write(&mut self, areas: &[Area]) -> Result<WriteSummary> {
        let index = self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(index) {
            return Err(AppError::persistence("disk full"));
        }
        let summary = self.inner.write(areas).await?;
        self.chunks
            .lock()
            .unwrap()
            .push(areas.iter().map(|a| a.name.clone()).collect());
        Ok(summary)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

fn write_feed(tmp: &TempDir, count: usize) -> String {
    let lines: Vec<String> = (1..=count)
        .map(|i| {
            format!(
                r#"{{"name": "Area {i}", "sectors": [{{"name": "Main Wall", "routes": [{{"name": "Route {i}", "grade": "6a+"}}]}}]}}"#
            )
        })
        .collect();
    let path = tmp.path().join("areas.jsonl");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path.display().to_string()
}

fn driver(tmp: &TempDir, storage: Arc<RecordingStorage>, log: Arc<MemoryErrorLog>) -> Driver {
    let deps = ParserDeps {
        config: Arc::new(Config::default()),
        client: reqwest::Client::new(),
        checkpoints: CheckpointStore::new(tmp.path().join("storage").join("state")),
    };
    Driver::new(
        ParserRegistry::new(deps),
        storage,
        log,
        WorkerOptions {
            retrieval_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        },
    )
}

fn request(source: &str, chunk_size: usize) -> RunRequest {
    RunRequest {
        chunk_size: Some(chunk_size),
        ..RunRequest::new(source)
    }
}

async fn saved_cursor(tmp: &TempDir) -> FeedCursor {
    let store = CheckpointStore::new(tmp.path().join("storage").join("state"));
    let names = store.list().await.unwrap();
    assert_eq!(names.len(), 1);
    store.load(&names[0]).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_chunks_arrive_in_source_order() {
    let tmp = TempDir::new().unwrap();
    let source = write_feed(&tmp, 7);
    let storage = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), None));
    let mut driver = driver(&tmp, storage.clone(), Arc::new(MemoryErrorLog::new()));

    let outcome = driver.run(request(&source, 3), &mut SinglePass).await;

    let report = outcome.passes()[0].outcome.as_ref().unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.records, 7);
    assert!(report.summary.finished);
    assert_eq!(
        storage.chunks(),
        vec![
            vec!["Area 1", "Area 2", "Area 3"],
            vec!["Area 4", "Area 5", "Area 6"],
            vec!["Area 7"],
        ]
    );
    assert_eq!(storage.inner.count_areas().await.unwrap(), 7);
}

#[tokio::test]
async fn test_exact_multiple_of_chunk_size() {
    let tmp = TempDir::new().unwrap();
    let source = write_feed(&tmp, 6);
    let storage = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), None));
    let mut driver = driver(&tmp, storage.clone(), Arc::new(MemoryErrorLog::new()));

    let outcome = driver.run(request(&source, 3), &mut SinglePass).await;

    let report = outcome.passes()[0].outcome.as_ref().unwrap();
    assert_eq!(report.chunks, 2);
    assert_eq!(report.records, 6);
    assert_eq!(storage.writes.load(Ordering::SeqCst), 2);
    assert_eq!(
        storage.chunks(),
        vec![
            vec!["Area 1", "Area 2", "Area 3"],
            vec!["Area 4", "Area 5", "Area 6"],
        ]
    );
}

#[tokio::test]
async fn test_failed_write_keeps_committed_chunks_and_resumes() {
    let tmp = TempDir::new().unwrap();
    let source = write_feed(&tmp, 7);
    let log = Arc::new(MemoryErrorLog::new());

    let failing = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), Some(1)));
    let mut first = driver(&tmp, failing.clone(), log.clone());
    let outcome = first.run(request(&source, 3), &mut SinglePass).await;

    let err = outcome.passes()[0].outcome.as_ref().unwrap_err();
    assert_eq!(err.kind(), FailureKind::Persistence);
    assert_eq!(first.state(), DriverState::Faulted);
    assert_eq!(failing.writes.load(Ordering::SeqCst), 2);
    assert_eq!(failing.chunks().len(), 1);
    assert_eq!(failing.inner.count_areas().await.unwrap(), 3);
    assert_eq!(saved_cursor(&tmp).await.committed, 3);
    assert_eq!(log.entries().len(), 1);
    assert!(log.entries()[0].contains("disk full"));
    assert!(!failing.inner.lock_path().exists());

    let healthy = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), None));
    let mut second = driver(&tmp, healthy.clone(), log.clone());
    let outcome = second.run(request(&source, 3), &mut SinglePass).await;

    let report = outcome.passes()[0].outcome.as_ref().unwrap();
    assert_eq!(report.records, 4);
    assert_eq!(
        healthy.chunks(),
        vec![vec!["Area 4", "Area 5", "Area 6"], vec!["Area 7"]]
    );
    assert_eq!(saved_cursor(&tmp).await.committed, 7);
    assert_eq!(healthy.inner.count_areas().await.unwrap(), 7);
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let source = write_feed(&tmp, 4);
    let storage = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), None));
    let mut driver = driver(&tmp, storage.clone(), Arc::new(MemoryErrorLog::new()));

    driver.run(request(&source, 2), &mut SinglePass).await;
    let first = storage.inner.load_areas().await.unwrap();

    let mut extended = ExtendedSettings::new();
    extended.insert("restart", "true");
    let replay = RunRequest {
        extended,
        ..request(&source, 3)
    };
    let outcome = driver.run(replay, &mut SinglePass).await;
    assert_eq!(outcome.passes()[0].outcome.as_ref().unwrap().records, 4);

    let second = storage.inner.load_areas().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.len(), 4);
    assert_eq!(second[0].sectors[0].routes[0].sector_id, second[0].sectors[0].id);
}

#[tokio::test]
async fn test_unknown_source_is_reported() {
    let tmp = TempDir::new().unwrap();
    let storage = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), None));
    let log = Arc::new(MemoryErrorLog::new());
    let mut driver = driver(&tmp, storage.clone(), log.clone());

    let outcome = driver.run(request("unknown-format", 3), &mut SinglePass).await;

    assert!(matches!(outcome, DriveOutcome::Unsupported { .. }));
    assert_eq!(storage.writes.load(Ordering::SeqCst), 0);
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn test_non_ascii_names_keep_distinct_keys() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("unicode.jsonl");
    let lines: Vec<String> = ["Ok Area", "東京", "Céüse", "Cöse"]
        .iter()
        .map(|name| format!(r#"{{"name": "{name}"}}"#))
        .collect();
    std::fs::write(&path, lines.join("\n")).unwrap();

    let storage = Arc::new(RecordingStorage::new(&tmp.path().join("storage"), None));
    let mut driver = driver(&tmp, storage.clone(), Arc::new(MemoryErrorLog::new()));
    let outcome = driver
        .run(request(&path.display().to_string(), 2), &mut SinglePass)
        .await;

    assert_eq!(outcome.passes()[0].outcome.as_ref().unwrap().records, 4);
    let stored: Vec<(String, String)> = storage
        .inner
        .load_areas()
        .await
        .unwrap()
        .into_iter()
        .map(|area| (area.key, area.name))
        .collect();
    assert_eq!(stored.len(), 4);
    assert!(stored.contains(&("東京".to_string(), "東京".to_string())));
    assert!(stored.contains(&("céüse".to_string(), "Céüse".to_string())));
    assert!(stored.contains(&("cöse".to_string(), "Cöse".to_string())));
}
