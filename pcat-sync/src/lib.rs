//! pcat-sync library interface
//!
//! Incremental catalog sync and AI enrichment for scanned polaroids.
//! Exposes public APIs for the `pcat` binary and integration testing.

pub mod config;
pub mod models;
pub mod services;

/// Build identification captured by `build.rs`
pub fn build_info() -> String {
    format!(
        "pcat-sync {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    )
}
