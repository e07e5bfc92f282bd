//! Local directory scan
//!
//! Merges image files already on disk into the catalog. Only the top level
//! of each directory is read; `.jpg` / `.jpeg` files (any casing) whose names
//! parse become records, the rest are reported as unparsed and left out.

use crate::services::catalog_store::CatalogStore;
use crate::services::source_sync::{merge_discovered, MergeOutcome};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Unparsed names printed in full before summarizing the rest
pub const UNPARSED_PREVIEW: usize = 20;

/// Directory scan errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Outcome of scanning one or more directories
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Image files seen
    pub found: usize,
    pub created: usize,
    pub updated: usize,
    /// Image filenames that do not follow the dated pattern
    pub unparsed: Vec<String>,
    /// Directory entries that could not be read
    pub errors: Vec<String>,
}

impl ScanReport {
    /// Up to [`UNPARSED_PREVIEW`] unparsed names plus how many were left out
    pub fn unparsed_preview(&self) -> (&[String], usize) {
        let shown = self.unparsed.len().min(UNPARSED_PREVIEW);
        (&self.unparsed[..shown], self.unparsed.len() - shown)
    }
}

/// Image files directly inside `dir`, sorted by name
pub fn list_images(dir: &Path) -> Result<(Vec<PathBuf>, Vec<String>), ScanError> {
    if !dir.exists() {
        return Err(ScanError::PathNotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(ScanError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut errors = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_image(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Unreadable directory entry");
                errors.push(e.to_string());
            }
        }
    }
    Ok((files, errors))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|e| e == "jpg" || e == "jpeg")
}

/// Merge every image in `dirs` into `store`
///
/// Existing records keep their analysis; only `local_path` is refreshed.
pub fn scan_into(store: &mut CatalogStore, dirs: &[PathBuf]) -> Result<ScanReport, ScanError> {
    let mut report = ScanReport::default();

    for dir in dirs {
        let (files, errors) = list_images(dir)?;
        tracing::info!(dir = %dir.display(), images = files.len(), "Scanning directory");
        report.found += files.len();
        report.errors.extend(errors);

        for path in files {
            let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let local_path = path.to_string_lossy().into_owned();
            match merge_discovered(store, &filename, local_path, None, None) {
                Some(MergeOutcome::Created { .. }) => report.created += 1,
                Some(MergeOutcome::Updated) => report.updated += 1,
                None => report.unparsed.push(filename),
            }
        }
    }

    tracing::info!(
        found = report.found,
        created = report.created,
        updated = report.updated,
        unparsed = report.unparsed.len(),
        "Directory scan completed"
    );
    Ok(report)
}
