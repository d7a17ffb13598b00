// src/parsing/feed.rs

//! JSON Lines feed parser.
//!
//! Each non-blank line of the feed holds one area. Grades are written as
//! text in any supported notation; routes whose grade cannot be read are
//! dropped with a trace. The cursor counts acknowledged records, so a
//! resumed pass skips exactly the records already written.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    Area, ClimbingTypes, Location, ParserSettings, Route, RouteGrade, Seasons, Sector, derive_id,
    natural_key,
};
use crate::parsing::{CheckpointStore, FeedCursor, Parser, ParserDeps, ParserEvents, RunSummary};
use crate::utils::http::fetch_text;

#[derive(Debug, Deserialize)]
struct FeedArea {
    #[serde(default)]
    key: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    season: Seasons,
    #[serde(default)]
    climbing: ClimbingTypes,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    sectors: Vec<FeedSector>,
}

#[derive(Debug, Deserialize)]
struct FeedSector {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    season: Seasons,
    #[serde(default)]
    climbing: ClimbingTypes,
    #[serde(default)]
    routes: Vec<FeedRoute>,
}

#[derive(Debug, Deserialize)]
struct FeedRoute {
    name: String,
    #[serde(default)]
    description: String,
    grade: String,
    #[serde(default)]
    climbing: Option<ClimbingTypes>,
}

/// Convert one feed line into an area, collecting warnings about dropped
/// routes.
fn parse_record(line: &str, source: &str) -> std::result::Result<(Area, Vec<String>), String> {
    let record: FeedArea = serde_json::from_str(line).map_err(|e| e.to_string())?;
    if record.name.trim().is_empty() {
        return Err("area without a name".to_string());
    }

    let mut warnings = Vec::new();
    let origin = record.origin.unwrap_or_else(|| source.to_string());

    let sectors = record
        .sectors
        .into_iter()
        .enumerate()
        .map(|(i, sector)| {
            let routes = sector
                .routes
                .into_iter()
                .filter_map(|route| match RouteGrade::detect(&route.grade) {
                    Some((grade, system)) => Some(Route {
                        id: String::new(),
                        sector_id: String::new(),
                        name: route.name,
                        description: route.description,
                        grade,
                        climbing: route.climbing.unwrap_or(system.implied_climbing()),
                        order: 0,
                    }),
                    None => {
                        warnings.push(format!(
                            "Dropped route '{}' in {}: unreadable grade '{}'",
                            route.name, sector.name, route.grade
                        ));
                        None
                    }
                })
                .enumerate()
                .map(|(order, mut route)| {
                    route.order = order as u32 + 1;
                    route
                })
                .collect();

            Sector {
                name: sector.name,
                description: sector.description,
                location: sector.location,
                tags: sector.tags,
                season: sector.season,
                climbing: sector.climbing,
                origin: origin.clone(),
                order: i as u32 + 1,
                routes,
                ..Sector::default()
            }
        })
        .collect();

    let key = record
        .key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| natural_key(&record.name));

    let area = Area {
        key,
        id: String::new(),
        name: record.name,
        description: record.description,
        location: record.location,
        tags: record.tags,
        season: record.season,
        climbing: record.climbing,
        origin,
        sectors,
    };
    Ok((area, warnings))
}

/// Non-blank lines with their 1-based line numbers.
fn records(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

/// Parser for JSON Lines feeds of areas.
pub struct FeedParser {
    source: String,
    name: String,
    settings: ParserSettings,
    client: reqwest::Client,
    checkpoints: CheckpointStore,
    cursor: FeedCursor,
}

impl FeedParser {
    pub fn new(source: impl Into<String>, deps: &ParserDeps) -> Self {
        let source = source.into();
        let hash = derive_id(&["feed", &source]);
        Self {
            name: format!("feed-{}", &hash[..8]),
            cursor: FeedCursor {
                source: source.clone(),
                ..FeedCursor::default()
            },
            source,
            settings: ParserSettings::default(),
            client: deps.client.clone(),
            checkpoints: deps.checkpoints.clone(),
        }
    }

    /// Whether this parser understands the given source identifier.
    pub fn matches(source: &str) -> bool {
        let lower = source.trim().to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        lower.starts_with("file://") || path.ends_with(".jsonl") || path.ends_with(".json")
    }

    fn local_path(&self) -> Option<PathBuf> {
        if self.source.starts_with("http://") || self.source.starts_with("https://") {
            return None;
        }
        if self.source.starts_with("file://") {
            return Url::parse(&self.source)
                .ok()
                .and_then(|url| url.to_file_path().ok());
        }
        Some(PathBuf::from(&self.source))
    }

    async fn read_source(&self, events: &ParserEvents) -> Result<String> {
        match self.local_path() {
            Some(path) => events
                .retrieve("read feed", async {
                    tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|e| AppError::retrieval(path.display().to_string(), e))
                })
                .await,
            None => {
                events
                    .retrieve("fetch feed", fetch_text(&self.client, &self.source))
                    .await
            }
        }
    }

    async fn restore_cursor(&mut self, restart: bool) -> Result<()> {
        let fresh = FeedCursor {
            source: self.source.clone(),
            ..FeedCursor::default()
        };

        if restart {
            self.checkpoints.clear(&self.name).await?;
            self.cursor = fresh;
            return Ok(());
        }

        self.cursor = match self.checkpoints.load::<FeedCursor>(&self.name).await? {
            Some(saved) if saved.source == self.source => saved,
            _ => fresh,
        };
        Ok(())
    }

    /// Send the pending records and advance the cursor once they were
    /// acknowledged.
    async fn commit(
        &mut self,
        events: &ParserEvents,
        pending: &mut Vec<Area>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(pending);
        let count = records.len();

        events.chunk_ready(records).await?;

        self.cursor.committed += count;
        self.checkpoints.save(&self.name, &self.cursor).await?;
        summary.committed(count);
        events
            .trace(format!("Committed {} records", self.cursor.committed))
            .await;
        Ok(())
    }
}

#[async_trait]
impl Parser for FeedParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ParserSettings {
        &mut self.settings
    }

    async fn begin_parse(&mut self, events: &ParserEvents) -> Result<RunSummary> {
        let restart = self.settings.extended.flag("restart")?;
        let limit = self.settings.extended.parse::<usize>("limit")?;
        if limit == Some(0) {
            return Err(AppError::config("extended setting 'limit' must be > 0"));
        }
        let pass_limit = [self.settings.max_results, limit].into_iter().flatten().min();
        let chunk_size = self.settings.effective_chunk_size();

        self.restore_cursor(restart).await?;

        events.trace(format!("Reading feed {}", self.source)).await;
        let text = self.read_source(events).await?;

        if self.cursor.committed > 0 {
            events
                .trace(format!("Resuming after record {}", self.cursor.committed))
                .await;
        }

        let mut summary = RunSummary::default();
        let mut pending = Vec::with_capacity(chunk_size);
        let mut produced = 0;
        let mut exhausted = true;

        for (index, (line_no, line)) in records(&text).enumerate() {
            if index < self.cursor.committed {
                continue;
            }
            if pass_limit.is_some_and(|max| produced >= max) {
                exhausted = false;
                break;
            }

            let (area, warnings) = parse_record(line, &self.source).map_err(|e| {
                AppError::retrieval(&self.source, format!("line {line_no}: {e}"))
            })?;
            for warning in warnings {
                events.trace(warning).await;
            }

            pending.push(area);
            produced += 1;

            if pending.len() >= chunk_size {
                self.commit(events, &mut pending, &mut summary).await?;
            }
        }
        self.commit(events, &mut pending, &mut summary).await?;

        self.cursor.finished = exhausted;
        self.checkpoints.save(&self.name, &self.cursor).await?;
        summary.finished = exhausted;
        Ok(summary)
    }

    fn describe_checkpoint(&self) -> String {
        format!(
            "{} records committed from {}{}",
            self.cursor.committed,
            self.cursor.source,
            if self.cursor.finished { " (end of feed)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::parsing::ParserEvent;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn deps(tmp: &TempDir) -> ParserDeps {
        ParserDeps {
            config: Arc::new(Config::default()),
            client: reqwest::Client::new(),
            checkpoints: CheckpointStore::new(tmp.path().join("state")),
        }
    }

    fn line(name: &str) -> String {
        format!(
            r#"{{"name":"{name}","sectors":[{{"name":"Main Wall","routes":[{{"name":"Classic","grade":"5.9"}},{{"name":"Project","grade":"??"}},{{"name":"Problem","grade":"V3"}}]}}]}}"#
        )
    }

    fn write_feed(tmp: &TempDir, names: &[&str]) -> String {
        let path = tmp.path().join("areas.jsonl");
        let body: Vec<String> = names.iter().map(|n| line(n)).collect();
        std::fs::write(&path, body.join("\n\n")).unwrap();
        path.display().to_string()
    }

    /// Run one pass, acknowledging every chunk, and return chunk key lists.
    async fn run(parser: &mut FeedParser) -> (Result<RunSummary>, Vec<Vec<String>>) {
        let (events, mut rx) =
            ParserEvents::channel(CancellationToken::new(), Duration::from_secs(5));
        let consumer = async {
            let mut chunks: Vec<Vec<String>> = Vec::new();
            while let Some(event) = rx.recv().await {
                if let ParserEvent::ChunkReady(chunk) = event {
                    chunks.push(chunk.records.iter().map(|a| a.key.clone()).collect());
                    chunk.acknowledge(Ok(()));
                }
            }
            chunks
        };
        let producer = async {
            let result = parser.begin_parse(&events).await;
            drop(events);
            result
        };
        tokio::join!(producer, consumer)
    }

    #[test]
    fn test_matches() {
        assert!(FeedParser::matches("data/areas.jsonl"));
        assert!(FeedParser::matches("https://example.com/export.JSON?v=2"));
        assert!(FeedParser::matches("file:///tmp/areas.txt"));
        assert!(!FeedParser::matches("rockclimbing.com"));
        assert!(!FeedParser::matches("unknown-format"));
    }

    #[test]
    fn test_parse_record_drops_unreadable_grades() {
        let (area, warnings) = parse_record(&line("Red Rocks"), "feed").unwrap();
        assert_eq!(area.key, "red rocks");
        assert_eq!(area.origin, "feed");

        let routes = &area.sectors[0].routes;
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].order, 1);
        assert_eq!(routes[1].order, 2);
        assert_eq!(routes[1].climbing, ClimbingTypes::BOULDERING);
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_chunks_follow_source_order() {
        let tmp = TempDir::new().unwrap();
        let source = write_feed(&tmp, &["a", "b", "c", "d", "e", "f", "g"]);
        let mut parser = FeedParser::new(source, &deps(&tmp));
        parser.settings_mut().chunk_size = 3;

        let (result, chunks) = run(&mut parser).await;
        let summary = result.unwrap();

        assert_eq!(summary.areas, 7);
        assert_eq!(summary.chunks, 3);
        assert!(summary.finished);
        assert_eq!(chunks, vec![vec!["a", "b", "c"], vec!["d", "e", "f"], vec!["g"]]);
    }

    #[tokio::test]
    async fn test_resume_skips_committed_records() {
        let tmp = TempDir::new().unwrap();
        let source = write_feed(&tmp, &["a", "b", "c", "d", "e"]);
        let deps = deps(&tmp);

        let mut first = FeedParser::new(source.clone(), &deps);
        first.settings_mut().chunk_size = 2;
        first.settings_mut().extended.insert("limit", "2");
        let (result, _) = run(&mut first).await;
        assert!(!result.unwrap().finished);

        let mut second = FeedParser::new(source, &deps);
        second.settings_mut().chunk_size = 2;
        let (result, chunks) = run(&mut second).await;

        assert_eq!(result.unwrap().areas, 3);
        assert_eq!(chunks, vec![vec!["c", "d"], vec!["e"]]);
        assert!(second.describe_checkpoint().starts_with("5 records committed"));
    }

    #[tokio::test]
    async fn test_restart_discards_cursor() {
        let tmp = TempDir::new().unwrap();
        let source = write_feed(&tmp, &["a", "b"]);
        let deps = deps(&tmp);

        let mut first = FeedParser::new(source.clone(), &deps);
        run(&mut first).await.0.unwrap();

        let mut again = FeedParser::new(source.clone(), &deps);
        assert_eq!(run(&mut again).await.0.unwrap().areas, 0);

        let mut restarted = FeedParser::new(source, &deps);
        restarted.settings_mut().extended.insert("restart", "true");
        assert_eq!(run(&mut restarted).await.0.unwrap().areas, 2);
    }

    #[tokio::test]
    async fn test_malformed_line_is_a_retrieval_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.jsonl");
        std::fs::write(&path, format!("{}\n{{not json\n", line("a"))).unwrap();

        let mut parser = FeedParser::new(path.display().to_string(), &deps(&tmp));
        parser.settings_mut().chunk_size = 1;
        let (result, chunks) = run(&mut parser).await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Retrieval { .. }));
        assert!(err.to_string().contains("line 2"));
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_limit_fails_before_reading() {
        let tmp = TempDir::new().unwrap();
        let mut parser = FeedParser::new("missing.jsonl", &deps(&tmp));
        parser.settings_mut().extended.insert("limit", "many");

        let err = run(&mut parser).await.0.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_a_retrieval_error() {
        let tmp = TempDir::new().unwrap();
        let mut parser = FeedParser::new("missing.jsonl", &deps(&tmp));

        let err = run(&mut parser).await.0.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Retrieval);
    }
}
