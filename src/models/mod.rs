// src/models/mod.rs

//! Domain models for the ingestion pipeline.
//!
//! Configuration, parser settings and the area/sector/route records that
//! flow from parsers to the writer.

mod config;
mod grade;
mod place;
mod settings;

// Re-export all public types
pub use config::{Config, HttpConfig, IngestConfig, PathsConfig};
pub use grade::{DifficultyLevel, GradeSystem, RouteGrade};
pub use place::{Area, ClimbingTypes, Location, Route, Seasons, Sector, derive_id, format_tag, natural_key};
pub use settings::{ExtendedSettings, ParserSettings, parse_extended_settings};
