//! Source sync
//!
//! Reconciles freshly harvested rows against the catalog store:
//!
//! 1. Validate each row (URL and raw title required) and derive its filename
//! 2. Ensure the referenced asset exists locally (bounded concurrency)
//! 3. Merge into the store by filename:
//!    - existing record → only `local_path` / `source_url` change; the
//!      enrichment result is never touched
//!    - new record → date fields from the filename parser, falling back to
//!      the row's year when the filename does not parse
//!
//! Rows that fail validation or whose asset cannot be fetched are skipped and
//! logged; a later run retries them. Re-running with the same rows is a no-op
//! apart from re-verifying asset presence.

use crate::models::{HarvestedRow, Record, SyncParameters};
use crate::services::asset_fetcher::{AssetFetcher, FetchError};
use crate::services::catalog_store::{CatalogStore, UpsertOutcome};
use crate::services::filename_parser;
use futures::stream::{self, StreamExt};
use pcat_common::events::{CatalogEvent, EventBus};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Counters for one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// New records created
    pub created: usize,
    /// Existing records whose location fields were refreshed
    pub updated: usize,
    /// New records created from the row year because the filename did not parse
    pub unparsed: usize,
    /// Rows without a URL or raw title
    pub skipped_missing_fields: usize,
    /// Rows whose asset could not be fetched
    pub skipped_fetch_failed: usize,
    /// Rows repeating a filename already seen in this batch
    pub duplicates: usize,
}

impl SyncReport {
    pub fn skipped(&self) -> usize {
        self.skipped_missing_fields + self.skipped_fetch_failed + self.duplicates
    }
}

/// What a merge did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created { parsed: bool },
    Updated,
}

/// A row that passed validation and awaits its asset
#[derive(Debug, Clone)]
struct PlannedRow {
    filename: String,
    url: String,
    local_path: PathBuf,
    year: Option<String>,
}

/// Source sync service
pub struct SourceSync {
    fetcher: Arc<dyn AssetFetcher>,
    params: SyncParameters,
    event_bus: Option<EventBus>,
}

impl SourceSync {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, params: SyncParameters) -> Self {
        Self {
            fetcher,
            params,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Merge `rows` into `store`
    ///
    /// Does not persist and does not re-index; the caller does both.
    pub async fn sync(&self, store: &mut CatalogStore, rows: Vec<HarvestedRow>) -> SyncReport {
        let mut report = SyncReport::default();
        let planned = self.plan(rows, &mut report);
        let concurrency = self.params.download_concurrency.max(1);

        tracing::info!(
            rows = planned.len(),
            concurrency,
            "Verifying assets for harvested rows"
        );

        let fetched: Vec<(PlannedRow, Result<(), FetchError>)> = stream::iter(planned)
            .map(|row| {
                let fetcher = Arc::clone(&self.fetcher);
                async move {
                    let result = fetcher.ensure_asset(&row.url, &row.local_path).await;
                    (row, result)
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        for (row, result) in fetched {
            if let Err(e) = result {
                tracing::warn!(
                    filename = %row.filename,
                    url = %row.url,
                    error = %e,
                    "Asset fetch failed, skipping row until a later run"
                );
                report.skipped_fetch_failed += 1;
                continue;
            }

            let local_path = row.local_path.to_string_lossy().into_owned();
            match merge_discovered(
                store,
                &row.filename,
                local_path,
                Some(row.url),
                row.year.as_deref(),
            ) {
                Some(MergeOutcome::Created { parsed }) => {
                    report.created += 1;
                    if !parsed {
                        report.unparsed += 1;
                    }
                }
                Some(MergeOutcome::Updated) => report.updated += 1,
                None => report.skipped_missing_fields += 1,
            }
        }

        tracing::info!(
            created = report.created,
            updated = report.updated,
            unparsed = report.unparsed,
            skipped = report.skipped(),
            "Source sync completed"
        );

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(CatalogEvent::SyncCompleted {
                created: report.created,
                updated: report.updated,
                skipped: report.skipped(),
                timestamp: chrono::Utc::now(),
            });
        }

        report
    }

    fn plan(&self, rows: Vec<HarvestedRow>, report: &mut SyncReport) -> Vec<PlannedRow> {
        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            let (Some(url), Some(title)) = (row.image_url, row.date_title_raw) else {
                tracing::warn!(row = index, year = ?row.year, "Skipping row without image URL or title");
                report.skipped_missing_fields += 1;
                continue;
            };

            let Some(filename) = derive_filename(&title, &url) else {
                tracing::warn!(row = index, title = %title, "Skipping row whose title yields no filename");
                report.skipped_missing_fields += 1;
                continue;
            };

            if !seen.insert(filename.clone()) {
                tracing::warn!(row = index, filename = %filename, "Duplicate filename in harvested rows");
                report.duplicates += 1;
                continue;
            }

            planned.push(PlannedRow {
                local_path: asset_path(&self.params.assets_dir, &filename),
                filename,
                url,
                year: row.year,
            });
        }
        planned
    }
}

/// Merge one discovered asset into the store
///
/// Returns `None` when a new record would have no year at all (filename does
/// not parse and no fallback year was supplied).
pub fn merge_discovered(
    store: &mut CatalogStore,
    filename: &str,
    local_path: String,
    source_url: Option<String>,
    fallback_year: Option<&str>,
) -> Option<MergeOutcome> {
    if let Some(existing) = store.get_mut(filename) {
        existing.local_path = local_path;
        if source_url.is_some() {
            existing.source_url = source_url;
        }
        tracing::debug!(filename = %filename, "Existing record refreshed");
        return Some(MergeOutcome::Updated);
    }

    let (record, parsed) = match filename_parser::parse(filename) {
        Some(info) => {
            let mut record = Record::new(filename, local_path, info.year);
            record.month = Some(info.month);
            record.day = Some(info.day);
            record.suffix_original = Some(info.suffix_original);
            record.sortable_suffix = Some(info.sortable_suffix.into_string());
            record.extension = Some(info.extension);
            (record, true)
        }
        None => {
            let Some(year) = fallback_year else {
                tracing::warn!(filename = %filename, "Unparsed filename without a year, skipping");
                return None;
            };
            tracing::warn!(
                filename = %filename,
                year = %year,
                "Filename does not parse, recording with source year only"
            );
            (Record::new(filename, local_path, year), false)
        }
    };

    let mut record = record;
    record.source_url = source_url;
    match store.upsert(record) {
        UpsertOutcome::Inserted => tracing::debug!(filename = %filename, "New record created"),
        UpsertOutcome::Updated => {}
    }
    Some(MergeOutcome::Created { parsed })
}

/// Derive the catalog filename for a raw title and asset URL
///
/// The extension is `.png` when the URL mentions it, `.jpg` otherwise. Path
/// separators and control characters in the title become `_`.
pub fn derive_filename(raw_title: &str, url: &str) -> Option<String> {
    let title: String = raw_title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let title = title.trim_matches('.');
    if title.is_empty() {
        return None;
    }

    let extension = if url.to_lowercase().contains(".png") {
        ".png"
    } else {
        ".jpg"
    };
    Some(format!("{}{}", title, extension))
}

/// Deterministic local path of an asset
pub fn asset_path(assets_dir: &Path, filename: &str) -> PathBuf {
    assets_dir.join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_filename_extension_from_url() {
        assert_eq!(
            derive_filename("1990-05-02B", "https://cdn.example.org/x/abc.jpg").as_deref(),
            Some("1990-05-02B.jpg")
        );
        assert_eq!(
            derive_filename("1990-05-02B", "https://cdn.example.org/x/abc.PNG?w=800").as_deref(),
            Some("1990-05-02B.png")
        );
        assert_eq!(
            derive_filename(" 1990-05-02 copy ", "https://cdn.example.org/x/abc").as_deref(),
            Some("1990-05-02 copy.jpg")
        );
    }

    #[test]
    fn test_derive_filename_sanitizes() {
        assert_eq!(
            derive_filename("1990/05/02", "u.jpg").as_deref(),
            Some("1990_05_02.jpg")
        );
        assert_eq!(derive_filename("   ", "u.jpg"), None);
        assert_eq!(derive_filename("..", "u.jpg"), None);
    }

    #[test]
    fn test_merge_new_parsed_record() {
        let mut store = CatalogStore::empty("unused.json");
        let outcome = merge_discovered(
            &mut store,
            "1990-05-02B.jpg",
            "images/1990-05-02B.jpg".to_string(),
            Some("https://cdn/a.jpg".to_string()),
            Some("1990"),
        );

        assert_eq!(outcome, Some(MergeOutcome::Created { parsed: true }));
        let record = store.get("1990-05-02B.jpg").unwrap();
        assert_eq!(record.month.as_deref(), Some("05"));
        assert_eq!(record.sortable_suffix.as_deref(), Some("A_B"));
        assert!(record.ai_analysis.is_none());
    }

    #[test]
    fn test_merge_unparsed_uses_fallback_year() {
        let mut store = CatalogStore::empty("unused.json");
        let outcome = merge_discovered(
            &mut store,
            "Untitled (1992).png",
            "images/Untitled (1992).png".to_string(),
            Some("https://cdn/u.png".to_string()),
            Some("1992"),
        );

        assert_eq!(outcome, Some(MergeOutcome::Created { parsed: false }));
        let record = store.get("Untitled (1992).png").unwrap();
        assert_eq!(record.year, "1992");
        assert!(record.month.is_none());
        assert!(record.sortable_suffix.is_none());
    }

    #[test]
    fn test_merge_unparsed_without_year_skipped() {
        let mut store = CatalogStore::empty("unused.json");
        assert_eq!(
            merge_discovered(&mut store, "odd.jpg", "odd.jpg".to_string(), None, None),
            None
        );
        assert!(store.is_empty());
    }
}
