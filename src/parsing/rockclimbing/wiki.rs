//! Wiki page fields: name, description, location, seasons and climbing types.

use regex::Regex;

use crate::models::{ClimbingTypes, Location, Seasons};
use crate::utils::{collapse_whitespace, html_text};

/// Short words left lower-case when capitalizing names.
const MINOR_WORDS: &[&str] = &[
    "an", "the", "and", "but", "or", "of", "nor", "for", "yet", "so", "as", "la", "del", "de",
];

/// Details parsed from a single wiki page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WikiInfo {
    pub name: String,
    pub description: String,
    pub location: Option<Location>,
    pub season: Seasons,
    pub climbing: ClimbingTypes,
}

impl WikiInfo {
    /// Fill missing location, climbing and season from `other`.
    ///
    /// With `with_description`, a much richer description (more than three
    /// times longer) replaces the own one, and a missing name is taken over
    /// together with its description.
    pub fn merge_from(&mut self, other: &WikiInfo, with_description: bool) {
        if self.location.is_none() {
            self.location = other.location;
        }
        if self.climbing.is_empty() {
            self.climbing = other.climbing;
        }
        if self.season.is_empty() {
            self.season = other.season;
        }

        if with_description {
            if self.name.trim().is_empty() && !other.name.trim().is_empty() {
                self.name = other.name.clone();
                self.description = other.description.clone();
            } else if self.description.len() * 3 < other.description.len() {
                self.description = other.description.clone();
            }
        }
    }
}

fn upper_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Clean up a place or route name.
///
/// Strips list numbering and stray punctuation, spaces out parentheses and
/// capitalizes the first letter. With `capitalize_words`, every word except
/// short minor words is capitalized too.
pub fn normalize_name(name: &str, capitalize_words: bool) -> String {
    let mut text = html_text(name);
    if text.is_empty() {
        return text;
    }

    if let Some(re) = pattern!(r"^(\s|\.|-|\*)*[0-9]+\s*(\.|-|\*)+") {
        text = re.replace(&text, "").into_owned();
    }
    text = text
        .trim()
        .trim_matches(|c| matches!(c, '.' | '!' | '?' | ',' | '-' | '*' | ':' | ';'))
        .trim()
        .to_string();
    if let Some(re) = pattern!(r"(\w)\(") {
        text = re.replace_all(&text, "$1 (").into_owned();
    }
    if let Some(re) = pattern!(r"\)(\w)") {
        text = re.replace_all(&text, ") $1").into_owned();
    }

    if !text.chars().any(char::is_alphabetic) {
        return String::new();
    }

    if capitalize_words && text.contains(' ') {
        text = text
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let minor = w.chars().count() <= 3
                    && MINOR_WORDS.iter().any(|m| m.eq_ignore_ascii_case(w));
                if minor { w.to_string() } else { upper_first(w) }
            })
            .collect::<Vec<_>>()
            .join(" ");
    }
    text = upper_first(&text);

    // Leading single-digit grades such as "0 Traverse"
    if let Some(m) = pattern!(r"^0?[0-9]\s+").and_then(|re| re.find(&text)) {
        text = text[m.end()..].trim_start().to_string();
    }

    text
}

/// Tidy free text taken from a wiki field.
///
/// Very short fragments are dropped, a final period is added when the text
/// does not end in punctuation, and spacing around dashes and commas is
/// normalized. Links are returned untouched.
pub fn fix_punctuation(content: &str) -> String {
    let mut text = content.trim().to_string();
    if text == "[]" {
        return String::new();
    }
    if text.to_ascii_lowercase().starts_with("http") {
        return text;
    }

    let closed = [")", ").", ")!", ")?"].iter().any(|end| text.ends_with(end));
    if text.len() > 1 && text.starts_with('(') && !closed {
        text = text[1..].trim().to_string();
    }

    text = html_text(&text);
    text = text
        .trim_matches(|c| matches!(c, '-' | '*' | '+'))
        .trim()
        .to_string();

    if text.chars().count() < 3 {
        return String::new();
    }

    if !text.chars().last().is_some_and(|c| c.is_ascii_punctuation()) {
        text.push('.');
    }
    text = upper_first(&text);

    for (re, replacement) in [
        (pattern!(r"(\w)-(\w)"), "$1 - $2"),
        (pattern!(r"(\w)-\s+"), "$1 - "),
        (pattern!(r"\s+-(\w)"), " - $1"),
        (pattern!(r"(\w),(\w)"), "$1, $2"),
        (pattern!(r"\s+,\s"), ", "),
        (pattern!(r",\s+"), ", "),
    ] {
        if let Some(re) = re {
            text = re.replace_all(&text, replacement).into_owned();
        }
    }

    text
}

/// Value of a labelled field (`<strong>Label:</strong></td><td ...>value</td>`).
fn field(content: &str, label: &str) -> String {
    let pattern = format!(
        r"(?is){}:\s*</strong>\s*</td>\s*<td[^>]+>([^<]+)</td>",
        regex::escape(label)
    );
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| fix_punctuation(m.as_str()))
        .unwrap_or_default()
}

/// Builds a description out of the general text and the labelled sections.
struct DescriptionBuilder<'a> {
    content: &'a str,
    text: String,
    has_general: bool,
}

impl<'a> DescriptionBuilder<'a> {
    fn new(content: &'a str) -> Self {
        let general = pattern!(r"(?is)<td[^>]+>\s*<!--[^>]+Description[^>]+-->([^<]+)</td>")
            .and_then(|re| re.captures(content))
            .and_then(|caps| caps.get(1))
            .map(|m| fix_punctuation(m.as_str()))
            .unwrap_or_default();

        Self {
            content,
            has_general: !general.is_empty(),
            text: general,
        }
    }

    fn section(&mut self, label: &str) {
        let mut value = field(self.content, label);

        if label == "Directions" {
            let nearest = field(self.content, "Nearest town or city");
            if !nearest.is_empty() {
                value = format!(
                    "The nearest town or city is {}. {}",
                    nearest.trim().trim_end_matches('.'),
                    value
                );
            }
        } else if label == "Approach" {
            let time = approach_time(&field(self.content, "Approach Time"));
            if time.chars().any(|c| c.is_ascii_alphabetic()) {
                value = format!("The approach time is {}. {}", time.trim_end_matches('.'), value);
            }
        }

        let value = value.trim();
        if value.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        if self.has_general {
            self.text.push_str(&format!("### {label}\n"));
        }
        self.text.push_str(value);
        self.has_general = true;
    }
}

/// Put spaces around numbers: "20min" becomes "20 min".
fn approach_time(raw: &str) -> String {
    let spaced = match pattern!(r"([0-9]+)") {
        Some(re) => re.replace_all(raw, " $1 ").into_owned(),
        None => raw.to_string(),
    };
    collapse_whitespace(&spaced)
}

/// Parse a wiki page. Pages without a usable `<h2>` name yield None.
pub fn parse_wiki(content: &str) -> Option<WikiInfo> {
    let heading = pattern!(r"(?i)<h2>([^<>]+)</h2>")?.captures(content)?;
    let name = normalize_name(heading.get(1)?.as_str(), true);
    if name.is_empty() {
        return None;
    }

    let mut description = DescriptionBuilder::new(content);
    for label in ["Directions", "Approach", "Access issues"] {
        description.section(label);
    }

    let location = pattern!(r"(?i)<td[^>]+>(-?\d+(?:\.\d+)?),\s*(-?\d+(?:\.\d+)?)</td>")
        .and_then(|re| re.captures(content))
        .and_then(|caps| {
            let lat = caps.get(1)?.as_str().parse().ok()?;
            let lng = caps.get(2)?.as_str().parse().ok()?;
            Location::new(lat, lng)
        });

    let mut climbing = ClimbingTypes::from_text(&field(content, "Type of Climbing"));
    if climbing.is_empty() {
        climbing = ClimbingTypes::SPORT;
    }

    Some(WikiInfo {
        name,
        description: description.text,
        location,
        season: Seasons::from_text(&field(content, "When to Climb")),
        climbing,
    })
}
