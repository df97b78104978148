//! Link extraction from inbox messages.
//!
//! The extractor is a pure pattern scanner: no I/O, deterministic output.
//! It scans the plain text body (falling back to the HTML body treated as
//! text when the plain body is empty) and additionally scans the HTML body
//! for `href`-attribute links, then cleans and de-duplicates the candidates.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::domain::Message;

/// Built-in extraction pattern, used when neither the caller nor the
/// environment supplies one.
///
/// Policy note: an extractor constructed without a pattern falls back to this
/// default rather than extracting nothing. Callers that want a different
/// shape pass their own pattern (CLI `--pattern` or `TMPMAIL_LINK_PATTERN`).
pub const DEFAULT_LINK_PATTERN: &str = r#"https://www\.temi\.com/editor/t/[^\s"'<>]+"#;

/// Punctuation that pattern scans tend to capture off the end of a URL
/// embedded in prose.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')'];

/// Matches `href=` attribute values so HTML-only messages still yield links.
fn href_regex() -> &'static Regex {
    static HREF: OnceLock<Regex> = OnceLock::new();
    HREF.get_or_init(|| Regex::new(r#"href=['"]?([^'" >]+)"#).expect("static regex"))
}

/// Pattern-based link extractor with dedup.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    pattern: Regex,
}

impl LinkExtractor {
    /// Builds an extractor from an optional caller-supplied pattern.
    ///
    /// Falls back to [`DEFAULT_LINK_PATTERN`] when `pattern` is `None`.
    /// Matching is case-insensitive.
    pub fn new(pattern: Option<&str>) -> Result<Self, regex::Error> {
        let source = pattern.unwrap_or(DEFAULT_LINK_PATTERN);
        let pattern = RegexBuilder::new(source).case_insensitive(true).build()?;
        Ok(Self { pattern })
    }

    /// Extracts candidate links from a message.
    ///
    /// The result is de-duplicated preserving first-occurrence order; callers
    /// should only rely on "the first element is an acceptable candidate".
    pub fn extract_links(&self, message: &Message) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        // Plain text first; an empty text body falls back to scanning the
        // HTML as text.
        let body = if message.text.is_empty() {
            message.html.as_deref().unwrap_or("")
        } else {
            message.text.as_str()
        };

        for found in self.pattern.find_iter(body) {
            push_cleaned(found.as_str(), &mut seen, &mut links);
        }

        // href attributes contribute separately; the attribute value is
        // matched against the same pattern so a custom pattern narrows both
        // scans consistently.
        if let Some(html) = &message.html {
            for caps in href_regex().captures_iter(html) {
                let value = &caps[1];
                if let Some(found) = self.pattern.find(value) {
                    push_cleaned(found.as_str(), &mut seen, &mut links);
                }
            }
        }

        links
    }
}

fn push_cleaned(raw: &str, seen: &mut HashSet<String>, links: &mut Vec<String>) {
    let cleaned = raw.trim_end_matches(TRAILING_PUNCTUATION);
    if cleaned.is_empty() {
        return;
    }
    if seen.insert(cleaned.to_string()) {
        links.push(cleaned.to_string());
    }
}
