//! Chronological indexing
//!
//! Groups records by year and assigns each a zero-based position within its
//! year, ordered by (month, day, suffix sort key). Ties keep their store
//! order (stable sort), so the result is deterministic for a given store.
//! Positions are recomputed from scratch on every call; run it after every
//! merge of new records.

use crate::models::Record;
use crate::services::catalog_store::CatalogStore;
use std::collections::BTreeMap;

/// Assigns per-year positions and display locators
#[derive(Debug, Clone)]
pub struct ChronologicalIndexer {
    display_base_url: String,
}

/// Outcome of one indexing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Records per year
    pub years: BTreeMap<String, usize>,
    /// Records whose position changed (including newly indexed ones)
    pub repositioned: usize,
}

impl ChronologicalIndexer {
    pub fn new(display_base_url: impl Into<String>) -> Self {
        Self {
            display_base_url: display_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Public locator for a record at `position` in `year`
    pub fn locator(&self, year: &str, position: usize) -> String {
        format!("{}/{}/1/{}", self.display_base_url, year, position)
    }

    /// Assign positions to every record, then order the store by (year, position)
    pub fn index(&self, store: &mut CatalogStore) -> IndexReport {
        let mut report = IndexReport::default();

        store.update_all(
            |records| {
                report = self.assign_positions(records);
            },
            |r| (r.year.clone(), r.chronological_index_in_year),
        );

        tracing::info!(
            years = report.years.len(),
            repositioned = report.repositioned,
            "Chronological index updated"
        );
        report
    }

    /// Assign positions in place without reordering the slice
    pub fn assign_positions(&self, records: &mut [Record]) -> IndexReport {
        let mut by_year: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, record) in records.iter().enumerate() {
            by_year.entry(record.year.clone()).or_default().push(i);
        }

        let mut report = IndexReport::default();
        for (year, mut members) in by_year {
            // Stable: equal keys keep store order
            members.sort_by(|&a, &b| sort_triple(&records[a]).cmp(&sort_triple(&records[b])));

            for (position, &i) in members.iter().enumerate() {
                let record = &mut records[i];
                if record.chronological_index_in_year != Some(position) {
                    report.repositioned += 1;
                }
                record.chronological_index_in_year = Some(position);
                record.display_page_url = Some(self.locator(&year, position));
            }
            report.years.insert(year, members.len());
        }
        report
    }
}

fn sort_triple(record: &Record) -> (Option<&str>, Option<&str>, Option<&str>) {
    (
        record.month.as_deref(),
        record.day.as_deref(),
        record.sortable_suffix.as_deref(),
    )
}
