//! Resumable position of a rockclimbing.com crawl.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::listing::ListItem;

/// Indices into the listing hierarchy, pointing at the next area tree to
/// crawl and the number of its areas already written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlPosition {
    pub region: usize,
    pub country: usize,
    pub country_region: usize,
    pub area: usize,
    pub emitted: usize,
}

impl fmt::Display for CrawlPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "region {}, country {}, country region {}, area tree {}",
            self.region + 1,
            self.country + 1,
            self.country_region + 1,
            self.area + 1
        )?;
        if self.emitted > 0 {
            write!(f, " (+{} areas)", self.emitted)?;
        }
        Ok(())
    }
}

/// Checkpoint of a crawl: listings fetched so far and the position after the
/// last acknowledged area.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCursor {
    /// Listing pages by URL, so a resumed crawl sees the same ordering
    #[serde(default)]
    pub listings: BTreeMap<String, Vec<ListItem>>,

    #[serde(default)]
    pub position: CrawlPosition,

    #[serde(default)]
    pub finished: bool,
}

impl fmt::Display for CrawlCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.finished {
            write!(f, "finished ({} listings cached)", self.listings.len())
        } else {
            write!(
                f,
                "at {} ({} listings cached)",
                self.position,
                self.listings.len()
            )
        }
    }
}
