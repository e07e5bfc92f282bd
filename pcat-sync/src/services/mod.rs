//! Catalog services
//!
//! Pure derivations (sort keys, filename parsing, indexing, search), the
//! persistent store, and the two pipelines that mutate it: source sync and
//! enrichment. HTTP collaborators sit behind traits so tests can swap them.

pub mod analysis_client;
pub mod asset_fetcher;
pub mod catalog_search;
pub mod catalog_store;
pub mod chronological_indexer;
pub mod directory_scanner;
pub mod enrichment;
pub mod filename_parser;
pub mod sort_key;
pub mod source_sync;

pub use analysis_client::{AnalysisClient, AnalysisError, AnalysisReply, AnalysisRequest, HttpAnalysisClient};
pub use asset_fetcher::{AssetFetcher, FetchError, HttpAssetFetcher};
pub use catalog_search::{SearchHit, SearchQuery};
pub use catalog_store::{CatalogStore, CatalogSummary, UpsertOutcome};
pub use chronological_indexer::{ChronologicalIndexer, IndexReport};
pub use directory_scanner::{ScanError, ScanReport};
pub use enrichment::{AnalysisOutcome, Candidate, EnrichmentScheduler, EnrichmentStats};
pub use filename_parser::ParsedInfo;
pub use sort_key::SortKey;
pub use source_sync::{SourceSync, SyncReport};
