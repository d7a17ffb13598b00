// src/parsing/rockclimbing/mod.rs

//! rockclimbing.com route wiki crawler.
//!
//! The wiki is laid out as regions, countries, country regions and finally
//! area trees. Listing pages are kept in the cursor, so a resumed crawl
//! walks the same ordering it saved positions against. Area trees are
//! fetched page by page; pages with a route table become sectors.

/// Lazily compiled regular expression, `None` if the pattern is invalid.
macro_rules! pattern {
    ($re:expr) => {{
        static CELL: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();
        CELL.get_or_init(|| regex::Regex::new($re).ok()).as_ref()
    }};
}

mod cursor;
mod listing;
mod tree;
mod wiki;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{Area, ParserSettings, Route, RouteGrade, format_tag};
use crate::parsing::{CheckpointStore, Parser, ParserDeps, ParserEvents, RunSummary};
use crate::utils::get_domain;
use crate::utils::http::{HttpPageSource, PageSource};

pub use cursor::{CrawlCursor, CrawlPosition};
pub use listing::ListItem;
pub use tree::{WikiNode, WikiTree};
pub use wiki::WikiInfo;

use listing::{
    next_page_url, parse_list_items, parse_route_description, parse_route_table, prettify_url,
};
use wiki::parse_wiki;

/// Source identifier and checkpoint name.
pub const SOURCE_NAME: &str = "rockclimbing.com";

/// Root listing of the route wiki.
pub const BASE_URL: &str = "http://www.rockclimbing.com/routes/";

/// Origin recorded on every area and sector.
const ORIGIN: &str = "http://rockclimbing.com";

/// Areas waiting for the next chunk, each with the position to save once
/// it is acknowledged.
#[derive(Default)]
struct Batch {
    pending: Vec<(Area, CrawlPosition)>,
    produced: usize,
    summary: RunSummary,
}

/// Crawler for the rockclimbing.com route wiki.
pub struct RockClimbingComParser<S = HttpPageSource> {
    base_url: String,
    pages: S,
    settings: ParserSettings,
    checkpoints: CheckpointStore,
    checkpoint_name: String,
    cursor: CrawlCursor,
}

impl RockClimbingComParser<HttpPageSource> {
    pub fn new(deps: &ParserDeps) -> Self {
        let pages = HttpPageSource::new(deps.client.clone(), &deps.config.http);
        Self::with_pages(BASE_URL, pages, deps.checkpoints.clone())
    }

    /// Whether this parser understands the given source identifier.
    pub fn matches(source: &str) -> bool {
        let source = source.trim();
        source.eq_ignore_ascii_case(SOURCE_NAME)
            || get_domain(source).is_some_and(|host| {
                let host = host.to_ascii_lowercase();
                host == SOURCE_NAME || host == format!("www.{SOURCE_NAME}")
            })
    }
}

impl<S: PageSource> RockClimbingComParser<S> {
    /// Create a crawler reading pages from `pages`, starting at `base_url`.
    pub fn with_pages(base_url: impl Into<String>, pages: S, checkpoints: CheckpointStore) -> Self {
        Self {
            base_url: base_url.into(),
            pages,
            settings: ParserSettings::default(),
            checkpoints,
            checkpoint_name: SOURCE_NAME.to_string(),
            cursor: CrawlCursor::default(),
        }
    }

    pub fn pages(&self) -> &S {
        &self.pages
    }

    pub fn cursor(&self) -> &CrawlCursor {
        &self.cursor
    }

    async fn fetch(&mut self, events: &ParserEvents, url: &str) -> Result<String> {
        events.retrieve("fetch page", self.pages.fetch(url)).await
    }

    /// Listing entries of a page, served from the cursor when known.
    async fn listing(&mut self, events: &ParserEvents, url: &str) -> Result<Vec<ListItem>> {
        if let Some(items) = self.cursor.listings.get(url) {
            return Ok(items.clone());
        }
        let content = self.fetch(events, url).await?;
        let items = parse_list_items(&content, url);
        self.cursor.listings.insert(url.to_string(), items.clone());
        Ok(items)
    }

    /// Routes of a page, following `more{n}.html` pagination and route
    /// detail pages.
    async fn load_routes(
        &mut self,
        events: &ParserEvents,
        page_url: &str,
        content: &str,
    ) -> Result<Vec<Route>> {
        let mut routes = Vec::new();
        let mut page = 1;
        let mut page_url = page_url.to_string();
        let mut content = content.to_string();
        let mut seen = HashSet::from([page_url.clone()]);

        loop {
            for row in parse_route_table(&content, &page_url) {
                let Some((grade, system)) = RouteGrade::detect(&row.grade) else {
                    continue;
                };

                let description = match &row.detail_url {
                    Some(url) => match self.fetch(events, url).await {
                        Ok(detail) => parse_route_description(&detail),
                        Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                        Err(e) => {
                            events
                                .trace(format!("No description for {}: {}", row.name, e))
                                .await;
                            String::new()
                        }
                    },
                    None => String::new(),
                };

                routes.push(Route {
                    id: String::new(),
                    sector_id: String::new(),
                    name: row.name,
                    description,
                    grade,
                    climbing: system.implied_climbing(),
                    order: routes.len() as u32 + 1,
                });
            }

            let Some(next) = next_page_url(&content, page, &page_url) else {
                break;
            };
            if !seen.insert(next.clone()) {
                break;
            }
            content = self.fetch(events, &next).await?;
            page_url = next;
            page += 1;
        }

        Ok(routes)
    }

    /// Fetch every page reachable from an area listing entry.
    ///
    /// Only the root page is required; unreachable child pages are skipped.
    async fn load_tree(&mut self, events: &ParserEvents, url: &str) -> Result<WikiTree> {
        let mut tree = WikiTree::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, Option<usize>)> = vec![(url.to_string(), None)];

        while let Some((url, parent)) = stack.pop() {
            if !visited.insert(url.clone()) {
                continue;
            }
            events.trace(format!("Tree node: {}", prettify_url(&url))).await;

            let content = match self.fetch(events, &url).await {
                Ok(content) => content,
                Err(e) if parent.is_some() && !matches!(e, AppError::Cancelled) => {
                    events.trace(format!("Skipping {url}: {e}")).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if content.trim().is_empty() {
                continue;
            }

            let routes = self.load_routes(events, &url, &content).await?;
            let index = tree.push(WikiNode {
                info: parse_wiki(&content),
                routes,
                parent,
            });

            let children = parse_list_items(&content, &url);
            stack.extend(children.into_iter().rev().map(|item| (item.url, Some(index))));
        }

        Ok(tree)
    }

    async fn queue(
        &mut self,
        events: &ParserEvents,
        batch: &mut Batch,
        area: Area,
        position: CrawlPosition,
    ) -> Result<()> {
        batch.pending.push((area, position));
        batch.produced += 1;
        if batch.pending.len() >= self.settings.effective_chunk_size() {
            self.flush(events, batch).await?;
        }
        Ok(())
    }

    /// Hand the pending areas to the writer; the cursor moves only after
    /// the acknowledgement.
    async fn flush(&mut self, events: &ParserEvents, batch: &mut Batch) -> Result<()> {
        let Some(position) = batch.pending.last().map(|(_, p)| *p) else {
            return Ok(());
        };
        let areas: Vec<Area> = std::mem::take(&mut batch.pending)
            .into_iter()
            .map(|(area, _)| area)
            .collect();
        let count = areas.len();

        events.chunk_ready(areas).await?;

        self.cursor.position = position;
        self.checkpoints
            .save(&self.checkpoint_name, &self.cursor)
            .await?;
        batch.summary.committed(count);
        events
            .trace(format!("Committed {count} areas, next: {position}"))
            .await;
        Ok(())
    }

    /// Walk the hierarchy from the saved position. Returns false when the
    /// result limit stopped the walk.
    async fn walk(
        &mut self,
        events: &ParserEvents,
        batch: &mut Batch,
        only_region: Option<&str>,
    ) -> Result<bool> {
        let base_url = self.base_url.clone();
        let regions = self.listing(events, &base_url).await?;

        if let Some(wanted) = only_region {
            if !regions.iter().any(|r| r.name.eq_ignore_ascii_case(wanted)) {
                let names: Vec<&str> = regions.iter().map(|r| r.name.as_str()).collect();
                return Err(AppError::config(format!(
                    "unknown region '{wanted}' (available: {})",
                    names.join(", ")
                )));
            }
        }

        let start = self.cursor.position;

        for r in start.region..regions.len() {
            let region = &regions[r];
            if only_region.is_some_and(|wanted| !region.name.eq_ignore_ascii_case(wanted)) {
                continue;
            }
            let at_region = r == start.region;
            events.trace(format!("Region: {}...", region.name)).await;
            let countries = self.listing(events, &region.url).await?;

            let first_country = if at_region { start.country } else { 0 };
            for c in first_country..countries.len() {
                let country = &countries[c];
                let at_country = at_region && c == start.country;
                events
                    .trace(format!("Country: {} -> {}...", region.name, country.name))
                    .await;
                let country_regions = self.listing(events, &country.url).await?;

                let first_country_region = if at_country { start.country_region } else { 0 };
                for cr in first_country_region..country_regions.len() {
                    let country_region = &country_regions[cr];
                    let at_country_region = at_country && cr == start.country_region;
                    let trees = self.listing(events, &country_region.url).await?;
                    let tags = [
                        region.name.clone(),
                        country.name.clone(),
                        country_region.name.clone(),
                    ];

                    let first_tree = if at_country_region { start.area } else { 0 };
                    for a in first_tree..trees.len() {
                        if self.settings.limit_reached(batch.produced) {
                            return Ok(false);
                        }
                        let skip = if at_country_region && a == start.area {
                            start.emitted
                        } else {
                            0
                        };

                        events
                            .trace(format!(
                                "Tree: {} -> {} -> {} -> {}...",
                                region.name, country.name, country_region.name, trees[a].name
                            ))
                            .await;
                        let tree = self.load_tree(events, &trees[a].url).await?;
                        let areas = tree.to_areas(&tags, ORIGIN);
                        let total = areas.len();

                        let here = CrawlPosition {
                            region: r,
                            country: c,
                            country_region: cr,
                            area: a,
                            emitted: 0,
                        };
                        let next_tree = CrawlPosition { area: a + 1, ..here };

                        for (j, area) in areas.into_iter().enumerate().skip(skip) {
                            if self.settings.limit_reached(batch.produced) {
                                return Ok(false);
                            }
                            let position = if j + 1 < total {
                                CrawlPosition { emitted: j + 1, ..here }
                            } else {
                                next_tree
                            };
                            self.queue(events, batch, area, position).await?;
                        }

                        if batch.pending.is_empty() {
                            self.cursor.position = next_tree;
                        }
                    }
                }
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl<S: PageSource + 'static> Parser for RockClimbingComParser<S> {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ParserSettings {
        &mut self.settings
    }

    async fn begin_parse(&mut self, events: &ParserEvents) -> Result<RunSummary> {
        let restart = self.settings.extended.flag("restart")?;
        let region = self
            .settings
            .extended
            .get("region")
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        self.checkpoint_name = match &region {
            Some(name) => format!("{SOURCE_NAME}-{}", format_tag(name)),
            None => SOURCE_NAME.to_string(),
        };

        if restart {
            self.checkpoints.clear(&self.checkpoint_name).await?;
            self.cursor = CrawlCursor::default();
        } else {
            self.cursor = self
                .checkpoints
                .load(&self.checkpoint_name)
                .await?
                .unwrap_or_default();
        }

        if self.cursor.finished {
            events
                .trace("Crawl already finished; pass -restart true to crawl again")
                .await;
            return Ok(RunSummary {
                finished: true,
                ..RunSummary::default()
            });
        }

        let mut batch = Batch::default();
        let completed = self.walk(events, &mut batch, region.as_deref()).await?;
        self.flush(events, &mut batch).await?;

        self.cursor.finished = completed;
        self.checkpoints
            .save(&self.checkpoint_name, &self.cursor)
            .await?;

        batch.summary.finished = completed;
        Ok(batch.summary)
    }

    fn describe_checkpoint(&self) -> String {
        format!("{}: {}", self.checkpoint_name, self.cursor)
    }
}
