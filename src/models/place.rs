//! Area, Sector and Route data structures.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::RouteGrade;

/// Length of the hex identifiers derived from natural keys.
const ID_LENGTH: usize = 16;

/// Declares a small bit-flag set serialized as its integer value.
macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $bit:expr => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u8);

        impl $name {
            pub const NONE: $name = $name(0);
            $(pub const $flag: $name = $name($bit);)+

            const NAMED: &'static [($name, &'static str)] = &[$(($name::$flag, $label)),+];

            pub fn bits(self) -> u8 {
                self.0
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn contains(self, other: $name) -> bool {
                other.0 != 0 && self.0 & other.0 == other.0
            }

            /// Look up a single flag by its name, ignoring case.
            pub fn from_name(name: &str) -> Option<$name> {
                Self::NAMED
                    .iter()
                    .find(|(_, label)| label.eq_ignore_ascii_case(name.trim()))
                    .map(|(flag, _)| *flag)
            }

            /// Collect every flag named in free text (words split on
            /// whitespace, `/` and `,`).
            pub fn from_text(text: &str) -> $name {
                text.split(|c: char| c.is_whitespace() || c == '/' || c == ',')
                    .map(|word| word.trim_matches(|c: char| c == '.' || c == ';'))
                    .filter_map($name::from_name)
                    .fold($name::NONE, |acc, flag| acc | flag)
            }
        }

        impl BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let names: Vec<&str> = Self::NAMED
                    .iter()
                    .filter(|(flag, _)| self.contains(*flag))
                    .map(|(_, label)| *label)
                    .collect();
                if names.is_empty() {
                    f.write_str("not specified")
                } else {
                    f.write_str(&names.join(", "))
                }
            }
        }
    };
}

flag_set! {
    /// Seasons in which a place can be climbed.
    Seasons {
        AUTUMN = 1 => "autumn",
        WINTER = 2 => "winter",
        SPRING = 4 => "spring",
        SUMMER = 8 => "summer",
    }
}

flag_set! {
    /// Styles of climbing found at a place.
    ClimbingTypes {
        SPORT = 1 => "sport",
        TRAD = 2 => "trad",
        BOULDERING = 4 => "bouldering",
    }
}

/// Geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// Build a location, rejecting latitudes outside [-90, 90].
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        ((-90.0..=90.0).contains(&latitude) && longitude.is_finite()).then_some(Self {
            latitude,
            longitude,
        })
    }

    /// Parse `"lat,lng"`.
    pub fn parse(text: &str) -> Option<Self> {
        let (lat, lng) = text.split_once(',')?;
        Self::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// A climbing area: the unit handed to the writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// Natural identifier used as the upsert key
    pub key: String,

    /// Identifier derived from `key`
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub location: Option<Location>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub season: Seasons,

    #[serde(default)]
    pub climbing: ClimbingTypes,

    /// Where the data was scraped from
    #[serde(default)]
    pub origin: String,

    #[serde(default)]
    pub sectors: Vec<Sector>,
}

/// A sector within an area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub area_id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub location: Option<Location>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub season: Seasons,

    #[serde(default)]
    pub climbing: ClimbingTypes,

    #[serde(default)]
    pub origin: String,

    /// 1-based position within the area
    #[serde(default)]
    pub order: u32,

    #[serde(default)]
    pub routes: Vec<Route>,
}

/// A single route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub sector_id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub grade: RouteGrade,

    #[serde(default = "default_route_climbing")]
    pub climbing: ClimbingTypes,

    /// 1-based position within the sector
    #[serde(default)]
    pub order: u32,
}

fn default_route_climbing() -> ClimbingTypes {
    ClimbingTypes::SPORT
}

impl Area {
    /// Create an area keyed by the natural key of its name.
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: natural_key(&name),
            name,
            ..Self::default()
        }
    }

    /// Fill in derived identifiers and parent references.
    ///
    /// Identifiers depend only on the natural key and names, so normalizing
    /// the same area twice yields identical rows.
    pub fn normalize(&mut self) {
        self.key = self.key.trim().to_string();
        self.id = derive_id(&["area", &self.key]);

        for sector in &mut self.sectors {
            sector.id = derive_id(&["sector", &self.id, &natural_key(&sector.name)]);
            sector.area_id = self.id.clone();

            sector.routes.retain(|r| !r.name.trim().is_empty());
            sector.routes.sort_by_key(|r| r.order);
            for route in &mut sector.routes {
                route.id = derive_id(&["route", &sector.id, &route.name.trim().to_lowercase()]);
                route.sector_id = sector.id.clone();
            }
        }
    }

    /// Total number of routes across all sectors.
    pub fn route_count(&self) -> usize {
        self.sectors.iter().map(|s| s.routes.len()).sum()
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.grade)
    }
}

/// Derive a short stable identifier from its parts.
pub fn derive_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..ID_LENGTH].to_string()
}

/// Case-insensitive identity of a name: trimmed, lower-cased, with runs of
/// whitespace collapsed to one space. Non-empty for any non-blank name.
pub fn natural_key(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lower-case, dash-separated form of a name used for tags and path segments.
pub fn format_tag(input: &str) -> String {
    static NON_TAG: OnceLock<Option<Regex>> = OnceLock::new();
    static DASHES: OnceLock<Option<Regex>> = OnceLock::new();

    let lower = input.trim().to_lowercase();
    let replaced = match NON_TAG.get_or_init(|| Regex::new(r"[^\p{L}\p{N}_\-]+").ok()) {
        Some(re) => re.replace_all(&lower, "-").into_owned(),
        None => lower,
    };
    let collapsed = match DASHES.get_or_init(|| Regex::new(r"-{2,}").ok()) {
        Some(re) => re.replace_all(&replaced, "-").into_owned(),
        None => replaced,
    };
    collapsed.trim_matches('-').to_string()
}
