//! Filename parsing
//!
//! Catalog filenames follow `YYYY-MM-DD<suffix>.<jpg|jpeg>`, with the
//! extension in any letter casing. Date parts stay strings so zero padding
//! survives into display and URLs.

use crate::services::sort_key::{self, SortKey};
use once_cell::sync::Lazy;
use regex::Regex;

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<year>[0-9]{4})-(?P<month>[0-9]{2})-(?P<day>[0-9]{2})(?P<suffix>.*?)\.(?P<ext>[jJ][pP][eE]?[gG])$",
    )
    .expect("filename pattern is a valid regex")
});

/// Components extracted from a catalog filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInfo {
    pub year: String,
    pub month: String,
    pub day: String,
    /// Raw suffix between the date and the extension (may be empty)
    pub suffix_original: String,
    /// Sort key derived from the suffix
    pub sortable_suffix: SortKey,
    /// Lowercased extension (`jpg` or `jpeg`)
    pub extension: String,
}

/// Parse a catalog filename
///
/// Returns `None` when the name does not follow the dated pattern; callers
/// treat that as an unparsed item, never as a fatal error.
pub fn parse(filename: &str) -> Option<ParsedInfo> {
    let caps = FILENAME_PATTERN.captures(filename)?;
    let suffix_original = caps["suffix"].to_string();

    Some(ParsedInfo {
        year: caps["year"].to_string(),
        month: caps["month"].to_string(),
        day: caps["day"].to_string(),
        sortable_suffix: sort_key::derive(&suffix_original),
        suffix_original,
        extension: caps["ext"].to_lowercase(),
    })
}
