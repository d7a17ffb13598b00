// src/pipeline/driver.rs

//! Pass loop around the worker.
//!
//! Every pass gets a fresh parser from the registry and a freshly opened
//! writer. Failures are logged and recorded, never propagated; after each
//! pass the operator is asked whether to continue from the last checkpoint.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::error::{AppError, FailureKind, Result};
use crate::models::{ExtendedSettings, ParserSettings};
use crate::parsing::{Parser, ParserRegistry};
use crate::pipeline::worker::{self, RunReport, WorkerOptions};
use crate::pipeline::ExecutionContext;
use crate::storage::WriterFactory;
use crate::utils::log::ErrorLog;

/// Lifecycle of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Completed,
    Faulted,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Idle => "idle",
            DriverState::Running => "running",
            DriverState::Completed => "completed",
            DriverState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// What to parse and how.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub source: String,
    /// Overrides the configured chunk size
    pub chunk_size: Option<usize>,
    /// Overrides the configured result limit per pass
    pub max_results: Option<usize>,
    pub extended: ExtendedSettings,
}

impl RunRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    fn apply(&self, settings: &mut ParserSettings) -> Result<()> {
        if let Some(chunk_size) = self.chunk_size {
            if chunk_size == 0 {
                return Err(AppError::config("chunk size must be a positive integer"));
            }
            settings.chunk_size = chunk_size;
        }
        if self.max_results.is_some() {
            settings.max_results = self.max_results;
        }
        for (key, value) in self.extended.iter() {
            settings.extended.insert(key, value);
        }
        Ok(())
    }
}

/// One finished pass.
#[derive(Debug)]
pub struct Pass {
    pub finished_at: DateTime<Local>,
    pub outcome: Result<RunReport>,
}

impl Pass {
    /// Whether the pass wrote anything and the source has more to give.
    pub fn made_progress(&self) -> bool {
        matches!(&self.outcome, Ok(report) if report.records > 0 && !report.summary.finished)
    }
}

/// Result of a driver run.
#[derive(Debug)]
pub enum DriveOutcome {
    /// No parser understands the source
    Unsupported { source: String },
    Ran { passes: Vec<Pass> },
}

impl DriveOutcome {
    pub fn passes(&self) -> &[Pass] {
        match self {
            DriveOutcome::Unsupported { .. } => &[],
            DriveOutcome::Ran { passes } => passes,
        }
    }
}

/// Decides whether another pass runs.
pub trait ResumePrompt: Send {
    /// Asked after every pass: continue from the last checkpoint?
    fn confirm_resume(&mut self, pass: &Pass) -> bool;
}

/// Never resumes.
#[derive(Debug, Default)]
pub struct SinglePass;

impl ResumePrompt for SinglePass {
    fn confirm_resume(&mut self, _pass: &Pass) -> bool {
        false
    }
}

/// Resumes while the previous pass made progress.
#[derive(Debug, Default)]
pub struct AutoResume;

impl ResumePrompt for AutoResume {
    fn confirm_resume(&mut self, pass: &Pass) -> bool {
        pass.made_progress()
    }
}

/// Runs parsers against a storage backend.
pub struct Driver {
    registry: ParserRegistry,
    storage: Arc<dyn WriterFactory>,
    error_log: Arc<dyn ErrorLog>,
    options: WorkerOptions,
    state: DriverState,
}

impl Driver {
    pub fn new(
        registry: ParserRegistry,
        storage: Arc<dyn WriterFactory>,
        error_log: Arc<dyn ErrorLog>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            registry,
            storage,
            error_log,
            options,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Run passes over `request.source` until the prompt declines or the
    /// run is cancelled.
    ///
    /// `restart` only applies to the first pass; later passes resume.
    pub async fn run(
        &mut self,
        mut request: RunRequest,
        prompt: &mut dyn ResumePrompt,
    ) -> DriveOutcome {
        let mut passes = Vec::new();

        loop {
            let Some(mut parser) = self.registry.create(&request.source) else {
                log::warn!("No parser found for '{}'.", request.source);
                return DriveOutcome::Unsupported {
                    source: request.source,
                };
            };
            let outcome = match request.apply(parser.settings_mut()) {
                Ok(()) => {
                    self.state = DriverState::Running;
                    log::info!(
                        "Pass {} with {} (chunk size {})",
                        passes.len() + 1,
                        parser.name(),
                        parser.settings().effective_chunk_size()
                    );
                    self.run_pass(parser).await
                }
                Err(e) => Err(e),
            };
            let pass = Pass {
                finished_at: Local::now(),
                outcome,
            };

            match &pass.outcome {
                Ok(report) => {
                    self.state = DriverState::Completed;
                    log::info!(
                        "{}: {} areas in {} chunks, {}",
                        report.parser,
                        report.records,
                        report.chunks,
                        report.checkpoint
                    );
                }
                Err(e) => {
                    self.state = DriverState::Faulted;
                    self.error_log.write_error(e);
                    log::error!("Pass failed ({}): {}", e.kind(), e);
                }
            }

            let stop = match &pass.outcome {
                Err(e) => matches!(e.kind(), FailureKind::Cancelled | FailureKind::Configuration),
                Ok(_) => false,
            } || self.options.cancel.is_cancelled();
            let resume = !stop && prompt.confirm_resume(&pass);
            passes.push(pass);
            if !resume {
                break;
            }
            request.extended.remove("restart");
        }

        DriveOutcome::Ran { passes }
    }

    async fn run_pass(&self, parser: Box<dyn Parser>) -> Result<RunReport> {
        let writer = self.storage.open().await?;
        let context = ExecutionContext::new(parser, writer);
        worker::join(worker::spawn(context, self.options.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::parsing::{CheckpointStore, ParserDeps};
    use crate::storage::LocalStorage;
    use crate::utils::log::MemoryErrorLog;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Scripted(VecDeque<bool>);

    impl ResumePrompt for Scripted {
        fn confirm_resume(&mut self, _pass: &Pass) -> bool {
            self.0.pop_front().unwrap_or(false)
        }
    }

    fn driver(tmp: &TempDir, log: Arc<MemoryErrorLog>) -> Driver {
        let deps = ParserDeps {
            config: Arc::new(Config::default()),
            client: reqwest::Client::new(),
            checkpoints: CheckpointStore::new(tmp.path().join("state")),
        };
        Driver::new(
            ParserRegistry::new(deps),
            Arc::new(LocalStorage::new(tmp.path())),
            log,
            WorkerOptions {
                retrieval_timeout: Duration::from_secs(5),
                write_timeout: Duration::from_secs(5),
                cancel: CancellationToken::new(),
            },
        )
    }

    fn feed(tmp: &TempDir, count: usize) -> String {
        let lines: Vec<String> = (1..=count)
            .map(|i| format!(r#"{{"name": "Area {i}"}}"#))
            .collect();
        let path = tmp.path().join("areas.jsonl");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_unsupported_source() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryErrorLog::new());
        let mut driver = driver(&tmp, log.clone());

        let outcome = driver
            .run(RunRequest::new("unknown-format"), &mut SinglePass)
            .await;

        assert!(matches!(outcome, DriveOutcome::Unsupported { ref source } if source == "unknown-format"));
        assert_eq!(driver.state(), DriverState::Idle);
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_prompt_resumes_from_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryErrorLog::new());
        let mut driver = driver(&tmp, log.clone());

        let mut request = RunRequest::new(feed(&tmp, 5));
        request.chunk_size = Some(2);
        request.max_results = Some(2);
        let mut prompt = Scripted(VecDeque::from([true, true, false]));

        let outcome = driver.run(request, &mut prompt).await;
        let records: Vec<usize> = outcome
            .passes()
            .iter()
            .map(|pass| pass.outcome.as_ref().unwrap().records)
            .collect();

        assert_eq!(records, vec![2, 2, 1]);
        assert_eq!(driver.state(), DriverState::Completed);
        assert_eq!(LocalStorage::new(tmp.path()).count_areas().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_auto_resume_stops_when_exhausted() {
        let tmp = TempDir::new().unwrap();
        let mut driver = driver(&tmp, Arc::new(MemoryErrorLog::new()));

        let mut request = RunRequest::new(feed(&tmp, 5));
        request.max_results = Some(2);

        let outcome = driver.run(request, &mut AutoResume).await;
        assert_eq!(outcome.passes().len(), 3);
        assert!(outcome.passes()[2].outcome.as_ref().unwrap().summary.finished);
    }

    #[tokio::test]
    async fn test_failure_is_logged_and_faults() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryErrorLog::new());
        let mut driver = driver(&tmp, log.clone());

        let missing = tmp.path().join("missing.jsonl").display().to_string();
        let outcome = driver.run(RunRequest::new(missing), &mut SinglePass).await;

        let err = outcome.passes()[0].outcome.as_ref().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Retrieval);
        assert_eq!(driver.state(), DriverState::Faulted);
        assert_eq!(log.entries().len(), 1);
        assert!(log.entries()[0].contains("missing.jsonl"));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryErrorLog::new());
        let mut driver = driver(&tmp, log.clone());

        let mut request = RunRequest::new(feed(&tmp, 3));
        request.chunk_size = Some(0);
        let mut prompt = Scripted(VecDeque::from([true, true]));

        let outcome = driver.run(request, &mut prompt).await;

        assert_eq!(outcome.passes().len(), 1);
        let err = outcome.passes()[0].outcome.as_ref().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert_eq!(driver.state(), DriverState::Faulted);
        assert_eq!(log.entries().len(), 1);
        assert_eq!(LocalStorage::new(tmp.path()).count_areas().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_locked_storage_faults_pass() {
        let tmp = TempDir::new().unwrap();
        let log = Arc::new(MemoryErrorLog::new());
        let mut driver = driver(&tmp, log.clone());
        let _held = LocalStorage::new(tmp.path()).open().await.unwrap();

        let outcome = driver
            .run(RunRequest::new(feed(&tmp, 1)), &mut SinglePass)
            .await;

        let err = outcome.passes()[0].outcome.as_ref().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Persistence);
        assert_eq!(driver.state(), DriverState::Faulted);
    }
}
