//! Parser settings and extended key/value options.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Marker that starts a new extended settings key.
const KEY_MARKER: char = '-';

/// Settings a parser reads before a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserSettings {
    /// Maximum number of areas per chunk
    pub chunk_size: usize,

    /// Stop the pass after this many areas
    pub max_results: Option<usize>,

    /// Source-specific options, passed through untouched by the driver
    pub extended: ExtendedSettings,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_results: None,
            extended: ExtendedSettings::default(),
        }
    }
}

impl ParserSettings {
    /// Chunk size clamped to at least one record.
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    /// Whether the per-pass result limit has been reached.
    pub fn limit_reached(&self, produced: usize) -> bool {
        self.max_results.is_some_and(|max| produced >= max)
    }
}

/// Free-form source options with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtendedSettings(BTreeMap<String, String>);

impl ExtendedSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a value, reporting malformed input as a configuration error.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    AppError::config(format!("extended setting '{key}' = '{raw}': {e}"))
                })
            })
            .transpose()
    }

    /// Parse a boolean flag (`true/false`, `yes/no`, `1/0`).
    pub fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            None => Ok(false),
            Some(v) => match v.as_str() {
                "true" | "yes" | "y" | "1" => Ok(true),
                "false" | "no" | "n" | "0" => Ok(false),
                _ => Err(AppError::config(format!(
                    "extended setting '{key}' = '{v}' is not a boolean"
                ))),
            },
        }
    }
}

impl FromIterator<(String, String)> for ExtendedSettings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Parse command tokens such as `-page 2 -mode full` into extended settings.
///
/// A marked token starts a key, the next unmarked token becomes its value.
/// Values without a pending key are dropped, and the last value wins.
pub fn parse_extended_settings<S: AsRef<str>>(tokens: &[S]) -> ExtendedSettings {
    let mut settings = ExtendedSettings::new();
    let mut pending: Option<String> = None;

    for token in tokens.iter().map(AsRef::as_ref) {
        let is_key = token.starts_with(KEY_MARKER)
            && !(pending.is_some() && looks_like_negative_number(token));

        if is_key {
            let key = token.trim_start_matches(KEY_MARKER).trim();
            pending = (!key.is_empty()).then(|| key.to_string());
        } else if let Some(key) = pending.take() {
            settings.insert(key, token);
        }
    }

    settings
}

fn looks_like_negative_number(token: &str) -> bool {
    token
        .strip_prefix(KEY_MARKER)
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}
