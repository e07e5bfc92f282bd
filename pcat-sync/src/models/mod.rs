//! Data models for pcat-sync
//!
//! - Catalog record and its enrichment state
//! - Harvested source rows
//! - Run parameters

pub mod harvested_row;
pub mod parameters;
pub mod record;

pub use harvested_row::HarvestedRow;
pub use parameters::{EnrichmentParameters, SyncParameters};
pub use record::{Analysis, AnalysisResult, FailureMarker, FailureReason, Record};
