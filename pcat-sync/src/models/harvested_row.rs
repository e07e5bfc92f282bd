//! Harvested source rows
//!
//! Rows are produced by the external scraping step as CSV with header
//! `year,date_title_raw,image_url[,thumbnail_url,source_page]`. They are
//! ephemeral: source sync consumes them and never persists them directly.

use pcat_common::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::path::Path;

/// One row scraped from the remote source
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HarvestedRow {
    /// Year the row was listed under
    #[serde(default, deserialize_with = "blank_as_none")]
    pub year: Option<String>,

    /// Raw date/title text, e.g. `1990-05-02B`
    #[serde(default, deserialize_with = "blank_as_none")]
    pub date_title_raw: Option<String>,

    /// Full-size asset URL
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_url: Option<String>,

    #[serde(default, deserialize_with = "blank_as_none")]
    pub thumbnail_url: Option<String>,

    #[serde(default, deserialize_with = "blank_as_none")]
    pub source_page: Option<String>,
}

impl HarvestedRow {
    pub fn new(year: &str, date_title_raw: &str, image_url: &str) -> Self {
        Self {
            year: Some(year.to_string()),
            date_title_raw: Some(date_title_raw.to_string()),
            image_url: Some(image_url.to_string()),
            thumbnail_url: None,
            source_page: None,
        }
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

/// Read harvested rows from a CSV file
pub fn load_rows(path: &Path) -> Result<Vec<HarvestedRow>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
    read_rows(file)
}

/// Read harvested rows from any CSV reader
///
/// A row that cannot be decoded is logged and skipped; it never fails the batch.
pub fn read_rows<R: Read>(reader: R) -> Result<Vec<HarvestedRow>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("CSV header: {}", e)))?;
    if !headers.iter().any(|h| h == "year") {
        return Err(Error::InvalidInput(
            "CSV header must contain a 'year' column".to_string(),
        ));
    }

    let mut rows = Vec::new();
    for (line, result) in csv_reader.deserialize::<HarvestedRow>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(row = line + 1, error = %e, "Skipping undecodable harvested row");
            }
        }
    }

    tracing::debug!(rows = rows.len(), "Harvested rows loaded");
    Ok(rows)
}
