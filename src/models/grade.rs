//! Route grades and conversions between grading systems.
//!
//! Grades are stored as a position on the YDS scale (5.0 to 5.15c). French,
//! Hueco and Ewbank notations map onto the same positions; some positions
//! have no equivalent in a given system and render as `-`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::ClimbingTypes;

/// A single row of the conversion table.
struct GradeRow {
    yds: &'static str,
    french: &'static str,
    hueco: Option<&'static str>,
    ewbank: Option<&'static str>,
}

const fn row(
    yds: &'static str,
    french: &'static str,
    hueco: Option<&'static str>,
    ewbank: Option<&'static str>,
) -> GradeRow {
    GradeRow {
        yds,
        french,
        hueco,
        ewbank,
    }
}

#[rustfmt::skip]
const TABLE: [GradeRow; 35] = [
    row("5.0", "1", None, None),
    row("5.1", "1", None, None),
    row("5.2", "2", None, Some("4")),
    row("5.3", "3", None, Some("5")),
    row("5.4", "4a", Some("V0"), Some("8")),
    row("5.5", "4b", Some("V0+"), Some("13")),
    row("5.6", "4c", None, Some("14")),
    row("5.7", "5a", Some("V1"), Some("15")),
    row("5.8", "5b", Some("V2"), Some("16")),
    row("5.9", "5c", None, Some("17")),
    row("5.10a", "6a", Some("V3"), Some("18")),
    row("5.10b", "6a+", Some("V3"), Some("19")),
    row("5.10c", "6b", Some("V4"), Some("20")),
    row("5.10d", "6b+", Some("V4"), Some("21")),
    row("5.11a", "6c", Some("V5"), Some("22")),
    row("5.11b", "6c", None, Some("23")),
    row("5.11c", "6c+", Some("V5"), Some("24")),
    row("5.11d", "7a", Some("V6"), Some("24")),
    row("5.12a", "7a+", Some("V7"), Some("25")),
    row("5.12b", "7b", Some("V8"), Some("26")),
    row("5.12c", "7b+", Some("V8"), Some("27")),
    row("5.12d", "7c", Some("V9"), Some("28")),
    row("5.13a", "7c+", Some("V10"), Some("29")),
    row("5.13b", "8a", Some("V11"), Some("29")),
    row("5.13c", "8a+", Some("V12"), Some("30")),
    row("5.13d", "8b", Some("V13"), Some("31")),
    row("5.14a", "8b+", Some("V14"), Some("32")),
    row("5.14b", "8c", Some("V15"), Some("33")),
    row("5.14c", "8c+", Some("V16"), Some("34")),
    row("5.14d", "9a", None, Some("35")),
    row("5.15a", "9a+", None, Some("36")),
    row("5.15b", "9b", None, Some("37")),
    row("5.15c", "9b+", None, Some("38")),
    row("5.15d", "9c", None, Some("39")),
    row("5.16a", "9c+", None, Some("40")),
];

/// Hardest grade a route can carry; harder notations are clamped to it.
const MAX_INDEX: u8 = 32;

/// Supported grading systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeSystem {
    Yds,
    French,
    Hueco,
    Ewbank,
}

impl GradeSystem {
    /// Parse order used when the system is unknown.
    const DETECTION_ORDER: [GradeSystem; 4] = [
        GradeSystem::Yds,
        GradeSystem::French,
        GradeSystem::Hueco,
        GradeSystem::Ewbank,
    ];

    /// Climbing style implied by a grade written in this system.
    pub fn implied_climbing(self) -> ClimbingTypes {
        match self {
            GradeSystem::Hueco => ClimbingTypes::BOULDERING,
            _ => ClimbingTypes::SPORT,
        }
    }

    fn label(self, row: &GradeRow) -> Option<&'static str> {
        match self {
            GradeSystem::Yds => Some(row.yds),
            GradeSystem::French => Some(row.french),
            GradeSystem::Hueco => row.hueco,
            GradeSystem::Ewbank => row.ewbank,
        }
    }

    /// Pattern that extracts the grade from longer text, with the length
    /// above which extraction is attempted.
    fn extractor(self) -> (usize, Option<&'static Regex>) {
        static YDS: OnceLock<Option<Regex>> = OnceLock::new();
        static FRENCH: OnceLock<Option<Regex>> = OnceLock::new();
        static HUECO: OnceLock<Option<Regex>> = OnceLock::new();
        static EWBANK: OnceLock<Option<Regex>> = OnceLock::new();

        fn compile(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
            cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
        }

        match self {
            GradeSystem::Yds => (5, compile(&YDS, r"5\.[0-9]{1,2}[abcd]?")),
            GradeSystem::French => (3, compile(&FRENCH, r"[1-9][abc]?\+?")),
            GradeSystem::Hueco => (3, compile(&HUECO, r"v[0-9]{1,2}\+?")),
            GradeSystem::Ewbank => (3, compile(&EWBANK, r"[0-9]+")),
        }
    }
}

/// Coarse difficulty buckets used for grouping routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DifficultyLevel {
    VeryEasy,
    Easy,
    Moderate,
    AboveModerate,
    Hard,
    VeryHard,
}

/// A route grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RouteGrade(u8);

impl RouteGrade {
    /// The easiest grade (5.0).
    pub const MIN: RouteGrade = RouteGrade(0);

    /// The hardest grade (5.15c).
    pub const MAX: RouteGrade = RouteGrade(MAX_INDEX);

    fn row(&self) -> &'static GradeRow {
        &TABLE[self.0 as usize]
    }

    /// Parse a grade written in any supported system.
    pub fn parse(text: &str) -> Option<RouteGrade> {
        Self::detect(text).map(|(grade, _)| grade)
    }

    /// Parse a grade and report which system matched.
    ///
    /// Systems are tried in order: YDS, French, Hueco, Ewbank.
    pub fn detect(text: &str) -> Option<(RouteGrade, GradeSystem)> {
        GradeSystem::DETECTION_ORDER
            .into_iter()
            .find_map(|system| Self::parse_in(text, system).map(|grade| (grade, system)))
    }

    /// Parse a grade written in the given system.
    pub fn parse_in(text: &str, system: GradeSystem) -> Option<RouteGrade> {
        let mut grade = text.trim().to_lowercase();
        if grade.is_empty() {
            return None;
        }

        let (threshold, extractor) = system.extractor();
        if grade.chars().count() > threshold {
            if let Some(m) = extractor.and_then(|re| re.find(&grade)) {
                grade = m.as_str().to_string();
            }
        }

        TABLE
            .iter()
            .position(|row| {
                system
                    .label(row)
                    .is_some_and(|label| label.eq_ignore_ascii_case(&grade))
            })
            .map(|index| RouteGrade((index as u8).min(MAX_INDEX)))
    }

    /// Render the grade in the given system, `-` when it has no equivalent.
    pub fn to_system(&self, system: GradeSystem) -> &'static str {
        system.label(self.row()).unwrap_or("-")
    }

    pub fn yds(&self) -> &'static str {
        self.row().yds
    }

    pub fn french(&self) -> &'static str {
        self.row().french
    }

    pub fn difficulty(&self) -> DifficultyLevel {
        match self.0 {
            0..=7 => DifficultyLevel::VeryEasy,
            8..=13 => DifficultyLevel::Easy,
            14..=18 => DifficultyLevel::Moderate,
            19..=22 => DifficultyLevel::AboveModerate,
            23..=26 => DifficultyLevel::Hard,
            _ => DifficultyLevel::VeryHard,
        }
    }
}

impl fmt::Display for RouteGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.french())
    }
}

impl TryFrom<String> for RouteGrade {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        RouteGrade::parse_in(&value, GradeSystem::Yds)
            .ok_or_else(|| format!("invalid YDS grade '{value}'"))
    }
}

impl From<RouteGrade> for String {
    fn from(grade: RouteGrade) -> Self {
        grade.yds().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yds() {
        let grade = RouteGrade::parse("5.10a").unwrap();
        assert_eq!(grade.yds(), "5.10a");
        assert_eq!(grade.french(), "6a");
    }

    #[test]
    fn test_parse_extracts_from_longer_text() {
        let (grade, system) = RouteGrade::detect("5.11c R/X").unwrap();
        assert_eq!(system, GradeSystem::Yds);
        assert_eq!(grade.yds(), "5.11c");
    }

    #[test]
    fn test_parse_french_and_hueco() {
        let (grade, system) = RouteGrade::detect("7a+").unwrap();
        assert_eq!(system, GradeSystem::French);
        assert_eq!(grade.yds(), "5.12a");

        let (grade, system) = RouteGrade::detect("V4").unwrap();
        assert_eq!(system, GradeSystem::Hueco);
        assert_eq!(grade.yds(), "5.10c");
        assert_eq!(system.implied_climbing(), ClimbingTypes::BOULDERING);
    }

    #[test]
    fn test_parse_ewbank() {
        let (grade, system) = RouteGrade::detect("22").unwrap();
        assert_eq!(system, GradeSystem::Ewbank);
        assert_eq!(grade.yds(), "5.11a");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RouteGrade::parse("").is_none());
        assert!(RouteGrade::parse("unknown").is_none());
    }

    #[test]
    fn test_hardest_grades_are_clamped() {
        assert_eq!(RouteGrade::parse("5.16a"), Some(RouteGrade::MAX));
        assert_eq!(RouteGrade::MAX.yds(), "5.15c");
    }

    #[test]
    fn test_missing_equivalent_renders_dash() {
        let grade = RouteGrade::parse("5.0").unwrap();
        assert_eq!(grade.to_system(GradeSystem::Hueco), "-");
        assert_eq!(grade.to_system(GradeSystem::Ewbank), "-");
    }

    #[test]
    fn test_difficulty_levels() {
        assert_eq!(RouteGrade::parse("5.7").unwrap().difficulty(), DifficultyLevel::VeryEasy);
        assert_eq!(RouteGrade::parse("5.10d").unwrap().difficulty(), DifficultyLevel::Easy);
        assert_eq!(RouteGrade::parse("5.12a").unwrap().difficulty(), DifficultyLevel::Moderate);
        assert_eq!(RouteGrade::parse("5.13a").unwrap().difficulty(), DifficultyLevel::AboveModerate);
        assert_eq!(RouteGrade::parse("5.14a").unwrap().difficulty(), DifficultyLevel::Hard);
        assert_eq!(RouteGrade::parse("5.14b").unwrap().difficulty(), DifficultyLevel::VeryHard);
    }

    #[test]
    fn test_serde_uses_yds_notation() {
        let grade = RouteGrade::parse("6b+").unwrap();
        let json = serde_json::to_string(&grade).unwrap();
        assert_eq!(json, "\"5.10d\"");

        let back: RouteGrade = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grade);
    }
}
