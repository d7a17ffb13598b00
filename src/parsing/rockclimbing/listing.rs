//! Listing pages and route tables.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::wiki::{fix_punctuation, normalize_name};
use crate::utils::{collapse_whitespace, resolve};

/// Number of cells per row in the route table.
const ROUTE_ROW_CELLS: usize = 5;

/// An entry of a listing page: a child page with its route count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub name: String,
    pub url: String,
    pub total: u32,
}

/// A row of a route table, before the grade is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRow {
    pub name: String,
    pub detail_url: Option<String>,
    pub grade: String,
}

fn absolute(page_url: &str, href: &str) -> String {
    resolve(page_url, href.trim()).unwrap_or_else(|| href.trim().to_string())
}

/// Parse `<dt>` list entries; entries without routes or without a name are
/// skipped.
pub fn parse_list_items(content: &str, page_url: &str) -> Vec<ListItem> {
    let Some(re) = pattern!(r#"(?i)<dt>[^<]+<a\s+href="([^"]+)">([^<]+)</a>([^<]+)</dt>"#) else {
        return Vec::new();
    };

    re.captures_iter(content)
        .filter_map(|caps| {
            let total: u32 = caps[3]
                .trim()
                .trim_matches(|c| c == '(' || c == ')')
                .trim()
                .parse()
                .ok()?;
            let name = normalize_name(caps[2].trim(), true);
            (total > 0 && !name.is_empty()).then(|| ListItem {
                name,
                url: absolute(page_url, &caps[1]),
                total,
            })
        })
        .collect()
}

/// Locate the route table that follows the "Routes" heading.
fn route_table(content: &str) -> Option<&str> {
    let heading = pattern!(r"(?i)<h3[^>]+>Routes</h3>")?.find(content)?;
    let rest = &content[heading.end()..];
    let table = pattern!(r#"(?i)<table[^>]+class="ftable">"#)?.find(rest)?;
    let rest = &rest[table.start()..];
    let end = pattern!(r"(?i)</table>")?.find(rest)?;
    Some(&rest[..end.end()])
}

/// Parse the rows of the route table of a page.
pub fn parse_route_table(content: &str, page_url: &str) -> Vec<RouteRow> {
    let Some(table) = route_table(content) else {
        return Vec::new();
    };
    let (Ok(cell), Ok(link)) = (Selector::parse("td"), Selector::parse("a")) else {
        return Vec::new();
    };

    let html = Html::parse_fragment(table);
    let cells: Vec<_> = html.select(&cell).collect();

    cells
        .chunks(ROUTE_ROW_CELLS)
        .filter(|row| row.len() > 3)
        .filter_map(|row| {
            let anchor = row[2].select(&link).next()?;
            let name = normalize_name(&anchor.text().collect::<String>(), false);
            if name.is_empty() {
                return None;
            }
            Some(RouteRow {
                name,
                detail_url: anchor
                    .value()
                    .attr("href")
                    .filter(|href| !href.trim().is_empty())
                    .map(|href| absolute(page_url, href)),
                grade: collapse_whitespace(&row[3].text().collect::<String>()),
            })
        })
        .collect()
}

/// URL of the next page of a paginated route table (`more{n}.html`).
pub fn next_page_url(content: &str, current_page: usize, page_url: &str) -> Option<String> {
    let pattern = format!(r#"(?i)href="([^"]*more{}\.html)""#, current_page + 1);
    let re = regex::Regex::new(&pattern).ok()?;
    let caps = re.captures(content)?;
    Some(absolute(page_url, &caps[1]))
}

/// Description shown on a route detail page.
pub fn parse_route_description(content: &str) -> String {
    pattern!(r#"(?i)<span\s+class="description">([^<]+)</span>"#)
        .and_then(|re| re.captures(content))
        .map(|caps| fix_punctuation(&caps[1]))
        .unwrap_or_default()
}

/// Human-readable path of a wiki URL: `Europe -> France -> Verdon`.
pub fn prettify_url(url: &str) -> String {
    const PREFIX: &str = "routes/";

    let lower = url.to_ascii_lowercase();
    match lower.find(PREFIX) {
        Some(index) if index > 0 => {
            let path = url[index + PREFIX.len()..]
                .replace('/', " -> ")
                .replace('_', " ");
            collapse_whitespace(&path)
                .trim_end_matches(|c| c == '-' || c == '>' || c == ' ')
                .trim()
                .to_string()
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "http://www.rockclimbing.com/routes/Europe/";

    #[test]
    fn test_parse_list_items() {
        let content = r#"
<dl>
<dt>&nbsp;<a href="France/">france</a> (120)</dt>
<dt>&nbsp;<a href="Monaco/">Monaco</a> (0)</dt>
<dt>&nbsp;<a href="/routes/Europe/United_Kingdom/">united kingdom</a> (35)</dt>
<dt>&nbsp;<a href="Empty/">...</a> (3)</dt>
</dl>"#;

        let items = parse_list_items(content, PAGE_URL);
        assert_eq!(
            items,
            vec![
                ListItem {
                    name: "France".to_string(),
                    url: "http://www.rockclimbing.com/routes/Europe/France/".to_string(),
                    total: 120,
                },
                ListItem {
                    name: "United Kingdom".to_string(),
                    url: "http://www.rockclimbing.com/routes/Europe/United_Kingdom/".to_string(),
                    total: 35,
                },
            ]
        );
    }

    #[test]
    fn test_parse_route_table() {
        let content = r#"
<table><tr><td class="x">not routes</td></tr></table>
<h3 class="head">Routes</h3>
<p>sorted by name</p>
<table width="100%" class="ftable">
<tr><th>#</th><th>Rating</th><th>Name</th><th>Grade</th><th>Type</th></tr>
<tr><td>1</td><td>***</td><td><a href="Super_Sirene.html">super sirene</a></td><td>5.10a</td><td>Sport</td></tr>
<tr><td>2</td><td></td><td>no link</td><td>5.9</td><td>Trad</td></tr>
<tr><td>3</td><td>*</td><td><a href="Pilier.html">Le Pilier</a></td><td> 6b+ </td><td>Sport</td></tr>
</table>
<a href="more2.html">next</a>"#;

        let rows = parse_route_table(content, PAGE_URL);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Super sirene");
        assert_eq!(
            rows[0].detail_url.as_deref(),
            Some("http://www.rockclimbing.com/routes/Europe/Super_Sirene.html")
        );
        assert_eq!(rows[0].grade, "5.10a");
        assert_eq!(rows[1].grade, "6b+");

        assert_eq!(
            next_page_url(content, 1, PAGE_URL).as_deref(),
            Some("http://www.rockclimbing.com/routes/Europe/more2.html")
        );
        assert!(next_page_url(content, 2, PAGE_URL).is_none());
    }

    #[test]
    fn test_missing_route_table() {
        assert!(parse_route_table("<h2>Area</h2>", PAGE_URL).is_empty());
    }

    #[test]
    fn test_parse_route_description() {
        let content = r#"<span class="description">thin moves on perfect rock</span>"#;
        assert_eq!(parse_route_description(content), "Thin moves on perfect rock.");
        assert_eq!(parse_route_description("<p></p>"), "");
    }

    #[test]
    fn test_prettify_url() {
        assert_eq!(
            prettify_url("http://www.rockclimbing.com/routes/Europe/France/Gorges_du_Verdon/"),
            "Europe -> France -> Gorges du Verdon"
        );
        assert_eq!(prettify_url("about:blank"), "about:blank");
    }
}
