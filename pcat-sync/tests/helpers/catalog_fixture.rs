//! Temp-dir catalog fixtures

use pcat_sync::models::{EnrichmentParameters, Record};
use pcat_sync::services::catalog_store::CatalogStore;
use pcat_sync::services::filename_parser;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// A catalog snapshot path plus an image directory, both inside a temp dir
pub struct CatalogFixture {
    pub dir: TempDir,
    pub snapshot: PathBuf,
    pub images: PathBuf,
}

impl CatalogFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let snapshot = dir.path().join("image_metadata.json");
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        Self {
            dir,
            snapshot,
            images,
        }
    }

    /// Write an image whose bytes are its filename and return its pending record
    pub fn image(&self, filename: &str) -> Record {
        let path = self.images.join(filename);
        std::fs::write(&path, filename.as_bytes()).unwrap();

        let path = path.to_string_lossy().into_owned();
        match filename_parser::parse(filename) {
            Some(info) => {
                let mut record = Record::new(filename, path, info.year);
                record.month = Some(info.month);
                record.day = Some(info.day);
                record.suffix_original = Some(info.suffix_original);
                record.sortable_suffix = Some(info.sortable_suffix.into_string());
                record.extension = Some(info.extension);
                record
            }
            None => Record::new(filename, path, "1990"),
        }
    }

    /// Persisted store holding one pending record per filename
    pub fn store_with(&self, filenames: &[&str]) -> CatalogStore {
        let mut store = CatalogStore::empty(&self.snapshot);
        for name in filenames {
            store.upsert(self.image(name));
        }
        store.save().unwrap();
        store
    }

    /// Fresh load of the snapshot from disk
    pub fn reload(&self) -> CatalogStore {
        CatalogStore::load(&self.snapshot).unwrap()
    }
}

/// Parameters with no pacing so tests run fast
pub fn fast_params(workers: usize, checkpoint_interval: usize) -> EnrichmentParameters {
    EnrichmentParameters {
        workers,
        checkpoint_interval,
        transient_pause: Duration::ZERO,
        request_spacing: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
        max_transient_failures: 0,
        limit: None,
    }
}
