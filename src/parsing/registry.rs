// src/parsing/registry.rs

//! Selects a parser for a source identifier.

use crate::parsing::{FeedParser, Parser, ParserDeps, RockClimbingComParser};

/// A registered parser variant.
pub struct ParserEntry {
    pub name: &'static str,
    pub description: &'static str,
    /// Whether the variant understands a source identifier
    pub matches: fn(&str) -> bool,
    build: fn(&str, &ParserDeps) -> Box<dyn Parser>,
}

fn build_rockclimbing(_source: &str, deps: &ParserDeps) -> Box<dyn Parser> {
    Box::new(RockClimbingComParser::new(deps))
}

fn build_feed(source: &str, deps: &ParserDeps) -> Box<dyn Parser> {
    Box::new(FeedParser::new(source, deps))
}

/// Variants in match priority order.
const ENTRIES: &[ParserEntry] = &[
    ParserEntry {
        name: "rockclimbing.com",
        description: "Crawls the rockclimbing.com route wiki (option: -region <name>)",
        matches: RockClimbingComParser::matches,
        build: build_rockclimbing,
    },
    ParserEntry {
        name: "feed",
        description: "JSON Lines feed of areas from a file or URL (option: -limit <n>)",
        matches: FeedParser::matches,
        build: build_feed,
    },
];

/// Static registry of parser variants.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    deps: ParserDeps,
}

impl ParserRegistry {
    pub fn new(deps: ParserDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &ParserDeps {
        &self.deps
    }

    pub fn entries(&self) -> &'static [ParserEntry] {
        ENTRIES
    }

    /// Create the parser for `source`, or None when no variant matches.
    ///
    /// The returned parser starts with the configured chunk size and result
    /// limit; callers may override them before parsing.
    pub fn create(&self, source: &str) -> Option<Box<dyn Parser>> {
        let entry = ENTRIES.iter().find(|entry| (entry.matches)(source))?;
        log::debug!("Source '{}' handled by {}", source, entry.name);

        let mut parser = (entry.build)(source.trim(), &self.deps);
        let ingest = &self.deps.config.ingest;
        let settings = parser.settings_mut();
        settings.chunk_size = ingest.chunk_size;
        settings.max_results = ingest.max_results;
        Some(parser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;
    use crate::parsing::CheckpointStore;
    use std::sync::Arc;

    fn registry() -> ParserRegistry {
        let mut config = Config::default();
        config.ingest.chunk_size = 4;
        config.ingest.max_results = Some(8);
        ParserRegistry::new(ParserDeps {
            config: Arc::new(config),
            client: reqwest::Client::new(),
            checkpoints: CheckpointStore::new("state"),
        })
    }

    #[test]
    fn test_create_by_source() {
        let registry = registry();

        let parser = registry.create("rockclimbing.com").unwrap();
        assert_eq!(parser.name(), "rockclimbing.com");
        assert_eq!(parser.settings().chunk_size, 4);
        assert_eq!(parser.settings().max_results, Some(8));

        let parser = registry.create("https://www.rockclimbing.com/routes/").unwrap();
        assert_eq!(parser.name(), "rockclimbing.com");

        let parser = registry.create("data/areas.jsonl").unwrap();
        assert!(parser.name().starts_with("feed-"));
    }

    #[test]
    fn test_unknown_source() {
        assert!(registry().create("unknown-format").is_none());
        assert!(registry().create("").is_none());
    }

    #[test]
    fn test_entries_listed() {
        let names: Vec<&str> = registry().entries().iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["rockclimbing.com", "feed"]);
    }
}
