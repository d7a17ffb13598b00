// src/parsing/events.rs

//! Events flowing from a running parser to the writer side.
//!
//! The channel holds at most one event, and every chunk carries a oneshot
//! sender the consumer uses to acknowledge it. A parser therefore cannot
//! produce the next chunk before the previous one was written.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::Area;

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 1;

/// Something a parser reports while running.
#[derive(Debug)]
pub enum ParserEvent {
    /// Informational progress message
    Trace(String),
    /// A batch of areas ready to be persisted
    ChunkReady(Chunk),
}

/// A batch of areas awaiting acknowledgement.
#[derive(Debug)]
pub struct Chunk {
    /// Zero-based position of the chunk within the pass
    pub index: usize,
    pub records: Vec<Area>,
    ack: oneshot::Sender<Result<()>>,
}

impl Chunk {
    /// Report the outcome of persisting this chunk back to the parser.
    pub fn acknowledge(self, outcome: Result<()>) {
        // The parser may already have given up (cancellation); nothing to do then.
        let _ = self.ack.send(outcome);
    }
}

/// Parser-side handle of the event channel.
#[derive(Debug)]
pub struct ParserEvents {
    tx: mpsc::Sender<ParserEvent>,
    cancel: CancellationToken,
    retrieval_timeout: Duration,
    next_index: AtomicUsize,
}

impl ParserEvents {
    /// Create a connected pair of parser handle and event receiver.
    pub fn channel(
        cancel: CancellationToken,
        retrieval_timeout: Duration,
    ) -> (Self, mpsc::Receiver<ParserEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let events = Self {
            tx,
            cancel,
            retrieval_timeout,
            next_index: AtomicUsize::new(0),
        };
        (events, rx)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Emit an informational message.
    pub async fn trace(&self, message: impl Into<String>) {
        // Traces are informational; a closed channel is reported by chunk_ready.
        let _ = self.tx.send(ParserEvent::Trace(message.into())).await;
    }

    /// Hand a chunk to the writer and wait until it has been persisted.
    ///
    /// Returns the writer's error when the chunk could not be committed.
    /// Empty chunks are not sent.
    pub async fn chunk_ready(&self, records: Vec<Area>) -> Result<()> {
        self.check_cancelled()?;
        if records.is_empty() {
            return Ok(());
        }

        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let (ack, done) = oneshot::channel();
        let chunk = Chunk {
            index,
            records,
            ack,
        };

        self.tx
            .send(ParserEvent::ChunkReady(chunk))
            .await
            .map_err(|_| AppError::Worker("event consumer stopped".to_string()))?;

        done.await.map_err(|_| {
            AppError::Worker(format!("chunk {index} was dropped without acknowledgement"))
        })?
    }

    /// Run one retrieval call under the retrieval timeout, aborting early on
    /// cancellation.
    pub async fn retrieve<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_cancelled()?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(AppError::Cancelled),
            outcome = tokio::time::timeout(self.retrieval_timeout, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(operation, self.retrieval_timeout.as_secs())),
            },
        }
    }
}
