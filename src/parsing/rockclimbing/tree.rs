//! Wiki page trees and their conversion into areas.
//!
//! A tree holds every page reachable from one area listing entry. Pages
//! that carry routes become sectors; the parent page of a sector names
//! its area. Location, season and climbing style are inherited from
//! ancestors when a page leaves them out.

use std::collections::HashMap;

use super::wiki::WikiInfo;
use crate::models::{Area, Route, Sector, format_tag};

/// A single page of the tree.
#[derive(Debug, Clone, Default)]
pub struct WikiNode {
    pub info: Option<WikiInfo>,
    pub routes: Vec<Route>,
    pub parent: Option<usize>,
}

/// Pages in discovery order; parents always precede their children.
#[derive(Debug, Clone, Default)]
pub struct WikiTree {
    nodes: Vec<WikiNode>,
}

impl WikiTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its index.
    pub fn push(&mut self, node: WikiNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of pages that carry routes.
    pub fn sector_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.routes.is_empty())
            .map(|(i, _)| i)
    }

    /// Node info merged with its ancestors, descriptions excluded.
    fn accumulate_all(&self, index: usize) -> Option<WikiInfo> {
        let node = &self.nodes[index];
        let mut info = node.info.clone()?;
        if let Some(inherited) = node.parent.and_then(|p| self.accumulate_all(p)) {
            info.merge_from(&inherited, false);
        }
        Some(info)
    }

    /// Node info merged with its ancestors, richer descriptions included.
    fn accumulate_wiki(&self, index: usize) -> Option<WikiInfo> {
        let node = &self.nodes[index];
        let mut info = node.info.clone()?;
        if let Some(inherited) = node.parent.and_then(|p| self.accumulate_wiki(p)) {
            info.merge_from(&inherited, true);
        }
        Some(info)
    }

    /// Tags for a node: the extra tags, then its ancestors, then itself.
    fn tags(&self, index: usize, extra: &[String]) -> Vec<String> {
        let node = &self.nodes[index];
        let Some(info) = &node.info else {
            return Vec::new();
        };

        let mut tags: Vec<String> = extra.iter().map(|t| format_tag(t)).collect();
        if let Some(parent) = node.parent {
            tags.extend(self.tags(parent, &[]));
        }
        tags.push(format_tag(&info.name));

        let mut unique = Vec::with_capacity(tags.len());
        for tag in tags {
            if !tag.is_empty() && !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        unique
    }

    /// Group sector pages into areas, in the order their first sector
    /// was discovered. Areas without sectors are dropped.
    pub fn to_areas(&self, extra_tags: &[String], origin: &str) -> Vec<Area> {
        let mut areas: Vec<Area> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        let mut order = 0;

        for index in self.sector_nodes() {
            let node = &self.nodes[index];
            let area_index = node.parent.unwrap_or(index);

            let (Some(sector_info), Some(area_info)) =
                (self.accumulate_all(index), self.accumulate_wiki(area_index))
            else {
                continue;
            };

            let sector_tags = self.tags(index, extra_tags);
            let area_tags = match node.parent {
                Some(parent) => self.tags(parent, extra_tags),
                None => sector_tags.clone(),
            };

            order += 1;
            let sector = Sector {
                name: sector_info.name,
                description: sector_info.description,
                location: sector_info.location,
                tags: sector_tags,
                season: sector_info.season,
                climbing: sector_info.climbing,
                origin: origin.to_string(),
                order,
                routes: node.routes.clone(),
                ..Sector::default()
            };

            let slot = *by_name.entry(area_info.name.clone()).or_insert_with(|| {
                areas.push(Area {
                    key: area_tags.join("/"),
                    name: area_info.name.clone(),
                    description: area_info.description.clone(),
                    location: area_info.location,
                    tags: area_tags.clone(),
                    season: area_info.season,
                    climbing: area_info.climbing,
                    origin: origin.to_string(),
                    ..Area::default()
                });
                areas.len() - 1
            });
            areas[slot].sectors.push(sector);
        }

        areas.retain(|area| !area.sectors.is_empty());
        areas
    }
}
