// src/parsing/mod.rs

//! Source parsers.
//!
//! - `feed`: JSON Lines feeds of areas (local files or HTTP)
//! - `rockclimbing`: the rockclimbing.com route wiki
//!
//! Parsers are selected through the `registry` and report their output
//! through `ParserEvents`.

pub mod checkpoint;
pub mod events;
pub mod feed;
pub mod registry;
pub mod rockclimbing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Config, ParserSettings};

pub use checkpoint::{CheckpointStore, FeedCursor};
pub use events::{Chunk, ParserEvent, ParserEvents};
pub use feed::FeedParser;
pub use registry::ParserRegistry;
pub use rockclimbing::RockClimbingComParser;

/// Outcome of one parsing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Areas acknowledged during this pass
    pub areas: usize,
    /// Chunks acknowledged during this pass
    pub chunks: usize,
    /// Whether the source has been exhausted
    pub finished: bool,
}

impl RunSummary {
    /// Record an acknowledged chunk.
    pub fn committed(&mut self, areas: usize) {
        self.areas += areas;
        self.chunks += 1;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} areas in {} chunks ({})",
            self.areas,
            self.chunks,
            if self.finished { "source exhausted" } else { "more available" }
        )
    }
}

/// Shared collaborators handed to parser constructors.
#[derive(Debug, Clone)]
pub struct ParserDeps {
    pub config: Arc<Config>,
    pub client: reqwest::Client,
    pub checkpoints: CheckpointStore,
}

/// A source-specific retrieve-and-transform loop.
///
/// Settings are adjusted before `begin_parse` and left alone while it runs.
/// Implementations emit areas through `ParserEvents::chunk_ready` and persist
/// their cursor only after a chunk was acknowledged, so a new pass resumes
/// right after the last committed chunk.
#[async_trait]
pub trait Parser: Send {
    /// Stable name of the source this parser reads.
    fn name(&self) -> &str;

    fn settings(&self) -> &ParserSettings;

    fn settings_mut(&mut self) -> &mut ParserSettings;

    /// Run one pass to completion or failure.
    async fn begin_parse(&mut self, events: &ParserEvents) -> Result<RunSummary>;

    /// One-line description of the current cursor.
    fn describe_checkpoint(&self) -> String;
}
