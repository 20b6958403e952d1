//! Front-matter metadata blocks.
//!
//! A content file may open with a block of `key: value` lines fenced by two
//! `---` lines:
//!
//! ```text
//! ---
//! title: "Getting Started"
//! order: 2
//! date: 2024-03-01
//! ---
//!
//! Body text…
//! ```
//!
//! [`parse`] is total: a missing block, an unterminated block, or malformed
//! lines all yield an empty (or partial) mapping rather than an error. The
//! typed accessors on [`FrontMatter`] return `None` for absent or unusable
//! values and leave the fallback choice to the caller.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const FENCE: &str = "---";

/// Parsed metadata block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    fields: BTreeMap<String, String>,
}

impl FrontMatter {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Non-empty `title`.
    pub fn title(&self) -> Option<&str> {
        self.get("title").filter(|t| !t.is_empty())
    }

    /// `order` as an integer.
    pub fn order(&self) -> Option<i64> {
        self.get("order").and_then(|v| v.parse::<i64>().ok())
    }

    /// `date` in RFC 3339, `YYYY-MM-DD HH:MM:SS`, or `YYYY-MM-DD` form.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.get("date").and_then(parse_date)
    }
}

/// Parse the leading metadata block of `content`.
pub fn parse(content: &str) -> FrontMatter {
    split(content).0
}

/// Parse the leading metadata block and return it with the remaining body.
pub fn split(content: &str) -> (FrontMatter, &str) {
    let text = content.strip_prefix('\u{feff}').unwrap_or(content);

    let Some(first_break) = text.find('\n') else {
        return (FrontMatter::default(), content);
    };
    if text[..first_break].trim_end() != FENCE {
        return (FrontMatter::default(), content);
    }

    let mut fields = BTreeMap::new();
    let mut offset = first_break + 1;
    for line in text[offset..].split_inclusive('\n') {
        let next = offset + line.len();
        if line.starts_with(FENCE) {
            return (FrontMatter { fields }, text[next..].trim());
        }
        if let Some((key, value)) = parse_line(line) {
            fields.insert(key, value);
        }
        offset = next;
    }

    // No closing fence: the file has no metadata block.
    (FrontMatter::default(), content)
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim().replace('"', "");
    Some((key.to_string(), value))
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Build a content file from editor fields and a body.
///
/// Every field except `body` becomes a metadata line. Single-line values are
/// quoted; multi-line strings become indented `|` blocks. Keys come out in
/// the map's iteration order.
pub fn compose(fields: &Map<String, Value>, body: &str) -> String {
    let mut out = String::from("---\n");
    for (key, value) in fields {
        if key == "body" {
            continue;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        if text.contains('\n') {
            out.push_str(&format!("{}: |\n  {}\n", key, text.replace('\n', "\n  ")));
        } else {
            // Double quotes are stripped by the parser, so keep the text readable.
            out.push_str(&format!("{}: \"{}\"\n", key, text.replace('"', "'")));
        }
    }
    out.push_str("---\n\n");
    out.push_str(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_fenced_block() {
        let (meta, body) = split(
            "---\ntitle: \"Getting Started\"\norder: 2\nurl: https://x.io/a:b\n---\n\n# Hello\n",
        );
        assert_eq!(meta.title(), Some("Getting Started"));
        assert_eq!(meta.order(), Some(2));
        assert_eq!(meta.get("url"), Some("https://x.io/a:b"));
        assert_eq!(body, "# Hello");
    }

    #[test]
    fn missing_block_yields_empty_mapping() {
        let meta = parse("# Just a heading\n\ntitle: not metadata\n");
        assert!(meta.is_empty());
        assert_eq!(meta.title(), None);
    }

    #[test]
    fn unterminated_block_yields_empty_mapping() {
        let (meta, body) = split("---\ntitle: Dangling\n\nno closing fence");
        assert!(meta.is_empty());
        assert!(body.starts_with("---"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let meta = parse("---\njust words\n: no key\ntitle:   Spaced  \n---\n");
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.title(), Some("Spaced"));
    }

    #[test]
    fn non_numeric_order_and_empty_title_read_as_absent() {
        let meta = parse("---\ntitle: \"\"\norder: first\n---\n");
        assert_eq!(meta.title(), None);
        assert_eq!(meta.order(), None);
    }

    #[test]
    fn crlf_files_parse() {
        let meta = parse("---\r\ntitle: Windows\r\norder: 4\r\n---\r\nbody");
        assert_eq!(meta.title(), Some("Windows"));
        assert_eq!(meta.order(), Some(4));
    }

    #[test]
    fn date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(parse("---\ndate: 2024-03-01\n---\n").date(), Some(expected));
        assert_eq!(
            parse("---\ndate: 2024-03-01T00:00:00.000Z\n---\n").date(),
            Some(expected)
        );
        assert_eq!(
            parse("---\ndate: 2024-03-01 00:00:00\n---\n").date(),
            Some(expected)
        );
        assert_eq!(parse("---\ndate: yesterday\n---\n").date(), None);
    }

    #[test]
    fn composed_file_parses_back() {
        let fields = json!({
            "title": "Deploying \"safely\"",
            "order": 3,
            "summary": "line one\nline two",
            "body": "ignored here",
        });
        let text = compose(fields.as_object().unwrap(), "# Body");

        assert!(text.starts_with("---\n"));
        assert!(text.contains("order: \"3\"\n"));
        assert!(text.contains("summary: |\n  line one\n  line two\n"));
        assert!(!text.contains("ignored here"));
        assert!(text.ends_with("---\n\n# Body"));

        let (meta, body) = split(&text);
        assert_eq!(meta.title(), Some("Deploying 'safely'"));
        assert_eq!(meta.order(), Some(3));
        assert_eq!(body, "# Body");
    }
}
