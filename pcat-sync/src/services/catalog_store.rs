//! Persistent catalog store
//!
//! The catalog is an ordered list of [`Record`]s persisted as one
//! pretty-printed JSON array. It is loaded once per run, mutated in memory by
//! a single owner, and rewritten wholesale (temp file + rename) on every
//! checkpoint and at run end.
//!
//! # Load semantics
//! - missing snapshot → empty store
//! - unreadable JSON or duplicate filenames → [`Error::DataCorruption`]

use crate::models::Record;
use pcat_common::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Result of [`CatalogStore::upsert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// In-memory catalog bound to its snapshot path
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    records: Vec<Record>,
    by_filename: HashMap<String, usize>,
}

impl CatalogStore {
    /// Empty store that will persist to `path`
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            by_filename: HashMap::new(),
        }
    }

    /// Load the snapshot at `path`
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No catalog snapshot yet, starting empty");
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let records: Vec<Record> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::corruption(&path, e.to_string()))?;

        let mut store = Self::empty(path);
        for record in records {
            if store.by_filename.contains_key(&record.filename) {
                return Err(Error::corruption(
                    &store.path,
                    format!("duplicate filename '{}'", record.filename),
                ));
            }
            store.by_filename.insert(record.filename.clone(), store.records.len());
            store.records.push(record);
        }

        tracing::info!(
            path = %store.path.display(),
            records = store.records.len(),
            "Catalog snapshot loaded"
        );
        Ok(store)
    }

    /// Persist the full snapshot atomically
    pub fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.records)?;
        pcat_common::fs::write_atomic(&self.path, &bytes)?;
        tracing::debug!(
            path = %self.path.display(),
            records = self.records.len(),
            "Catalog snapshot saved"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lookup by filename
    pub fn get(&self, filename: &str) -> Option<&Record> {
        self.by_filename.get(filename).map(|&i| &self.records[i])
    }

    /// Mutable lookup by filename
    ///
    /// Callers must not change `filename`; it is the index key.
    pub fn get_mut(&mut self, filename: &str) -> Option<&mut Record> {
        match self.by_filename.get(filename) {
            Some(&i) => Some(&mut self.records[i]),
            None => None,
        }
    }

    /// Insert a new record or replace the one with the same filename in place
    pub fn upsert(&mut self, record: Record) -> UpsertOutcome {
        match self.by_filename.get(&record.filename) {
            Some(&i) => {
                self.records[i] = record;
                UpsertOutcome::Updated
            }
            None => {
                self.by_filename.insert(record.filename.clone(), self.records.len());
                self.records.push(record);
                UpsertOutcome::Inserted
            }
        }
    }

    /// All records in store order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Apply `f` to every record, then re-order stably by `order`
    ///
    /// The filename index is rebuilt afterwards, so `f` may reorder nothing
    /// but must not rename records.
    pub fn update_all<F, K, O>(&mut self, f: F, order: O)
    where
        F: FnOnce(&mut [Record]),
        O: FnMut(&Record) -> K,
        K: Ord,
    {
        f(&mut self.records);
        self.records.sort_by_key(order);
        self.by_filename = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.filename.clone(), i))
            .collect();
    }

    /// Aggregate counts for status reporting
    pub fn summary(&self) -> CatalogSummary {
        let mut summary = CatalogSummary {
            total: self.records.len(),
            ..CatalogSummary::default()
        };
        for record in &self.records {
            match record.failure_reason() {
                Some(reason) => {
                    *summary.failed_by_reason.entry(reason.to_string()).or_default() += 1;
                }
                None if record.is_pending() => summary.pending += 1,
                None => summary.analyzed += 1,
            }
            *summary.per_year.entry(record.year.clone()).or_default() += 1;
        }
        summary
    }
}

/// Record counts by enrichment state and year
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    pub total: usize,
    pub pending: usize,
    pub analyzed: usize,
    pub failed_by_reason: BTreeMap<String, usize>,
    pub per_year: BTreeMap<String, usize>,
}

impl CatalogSummary {
    pub fn failed(&self) -> usize {
        self.failed_by_reason.values().sum()
    }
}
