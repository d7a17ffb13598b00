// src/pipeline/worker.rs

//! Runs an execution context on its own task.
//!
//! Parser and consumer are joined on the worker task and talk over the
//! event channel. The consumer writes each chunk under the write timeout
//! and acknowledges it; the writer is closed on every exit path.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, FailureKind, Result};
use crate::models::IngestConfig;
use crate::parsing::{ParserEvent, ParserEvents, RunSummary};
use crate::pipeline::ExecutionContext;
use crate::storage::AreaWriter;

/// Limits and cancellation for one run.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub retrieval_timeout: Duration,
    pub write_timeout: Duration,
    pub cancel: CancellationToken,
}

impl WorkerOptions {
    pub fn from_config(ingest: &IngestConfig, cancel: CancellationToken) -> Self {
        Self {
            retrieval_timeout: Duration::from_secs(ingest.retrieval_timeout_secs),
            write_timeout: Duration::from_secs(ingest.write_timeout_secs),
            cancel,
        }
    }
}

/// What a successful run delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Parser name
    pub parser: String,
    /// Chunks written
    pub chunks: usize,
    /// Areas written
    pub records: usize,
    pub summary: RunSummary,
    /// Parser cursor after the run
    pub checkpoint: String,
}

#[derive(Debug, Default)]
struct Delivered {
    chunks: usize,
    records: usize,
}

/// Spawn the worker task for `context`.
pub fn spawn(context: ExecutionContext, options: WorkerOptions) -> JoinHandle<Result<RunReport>> {
    tokio::spawn(run(context, options))
}

/// Await a worker, turning a panicked or aborted task into an error.
pub async fn join(handle: JoinHandle<Result<RunReport>>) -> Result<RunReport> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(AppError::Worker("worker task panicked".to_string())),
        Err(e) => Err(AppError::Worker(format!("worker task aborted: {e}"))),
    }
}

/// Run a context to completion on the current task.
pub async fn run(context: ExecutionContext, options: WorkerOptions) -> Result<RunReport> {
    let (mut parser, mut writer) = context.into_parts();
    let (events, rx) = ParserEvents::channel(options.cancel.clone(), options.retrieval_timeout);

    let producer = async {
        let result = parser.begin_parse(&events).await;
        drop(events);
        result
    };
    let consumer = consume(rx, writer.as_mut(), options.write_timeout);
    let (parsed, delivered) = tokio::join!(producer, consumer);

    let closed = writer.close().await;

    let summary = match (parsed, closed) {
        (Ok(summary), Ok(())) => summary,
        (Ok(_), Err(e)) => return Err(e),
        (Err(e), closed) => {
            if let Err(close_error) = closed {
                log::warn!("Failed to close writer: {close_error}");
            }
            return Err(e);
        }
    };

    Ok(RunReport {
        parser: parser.name().to_string(),
        chunks: delivered.chunks,
        records: delivered.records,
        summary,
        checkpoint: parser.describe_checkpoint(),
    })
}

async fn consume(
    mut rx: mpsc::Receiver<ParserEvent>,
    writer: &mut dyn AreaWriter,
    write_timeout: Duration,
) -> Delivered {
    let mut delivered = Delivered::default();

    while let Some(event) = rx.recv().await {
        let chunk = match event {
            ParserEvent::Trace(message) => {
                log::info!("{message}");
                continue;
            }
            ParserEvent::ChunkReady(chunk) => chunk,
        };

        let count = chunk.records.len();
        let outcome = match tokio::time::timeout(write_timeout, writer.write(&chunk.records)).await
        {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) if e.kind() == FailureKind::Persistence => Err(e),
            Ok(Err(e)) => Err(AppError::persistence_from(
                format!("chunk {} could not be written", chunk.index),
                e,
            )),
            Err(_) => Err(AppError::persistence_from(
                format!("chunk {} could not be written", chunk.index),
                AppError::timeout("write chunk", write_timeout.as_secs()),
            )),
        };

        match outcome {
            Ok(summary) => {
                delivered.chunks += 1;
                delivered.records += count;
                log::debug!(
                    "Chunk {}: {} areas ({} new, {} updated)",
                    chunk.index,
                    count,
                    summary.inserted,
                    summary.updated
                );
                chunk.acknowledge(Ok(()));
            }
            Err(e) => {
                log::warn!("Chunk {} failed: {}", chunk.index, e);
                chunk.acknowledge(Err(e));
            }
        }
    }

    delivered
}
