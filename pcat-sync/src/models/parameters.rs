//! Run parameters for source sync and enrichment
//!
//! Built from the TOML bootstrap config (plus CLI overrides) and handed to the
//! services, which never read configuration themselves.

use pcat_common::config::{CatalogConfig, EnrichmentConfig};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

/// Enrichment scheduler parameters
#[derive(Debug, Clone)]
pub struct EnrichmentParameters {
    /// Number of concurrent workers (at least 1)
    pub workers: usize,

    /// Persist after every N finalized items (at least 1)
    pub checkpoint_interval: usize,

    /// Pause a worker takes after a transient failure
    pub transient_pause: Duration,

    /// Minimum spacing between two requests from the same worker
    pub request_spacing: Duration,

    /// Upper bound on one analysis call
    pub request_timeout: Duration,

    /// Transient failures tolerated per record (0 = unlimited)
    pub max_transient_failures: u32,

    /// Dispatch at most this many candidates in one run
    pub limit: Option<usize>,
}

impl Default for EnrichmentParameters {
    fn default() -> Self {
        Self::from_config(&EnrichmentConfig::default())
    }
}

impl EnrichmentParameters {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            checkpoint_interval: config.checkpoint_interval.max(1),
            transient_pause: Duration::from_secs(config.transient_pause_secs),
            request_spacing: Duration::from_millis(config.request_spacing_ms),
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            max_transient_failures: config.max_transient_failures,
            limit: None,
        }
    }

    /// True once `failures` transient failures should finalize a record
    pub fn retries_exhausted(&self, failures: u32) -> bool {
        self.max_transient_failures != 0 && failures >= self.max_transient_failures
    }
}

/// Source sync parameters
#[derive(Debug, Clone)]
pub struct SyncParameters {
    /// Directory downloaded assets are stored in
    pub assets_dir: PathBuf,

    /// Asset downloads verified concurrently (0 is treated as 1)
    pub download_concurrency: usize,
}

impl SyncParameters {
    pub fn new(assets_dir: PathBuf, config: &CatalogConfig) -> Self {
        Self {
            assets_dir,
            download_concurrency: config.download_concurrency.max(1),
        }
    }
}

/// Convert an optional per-minute budget into a governor quota rate
pub fn per_minute(rate: Option<u32>) -> Option<NonZeroU32> {
    rate.and_then(NonZeroU32::new)
}
