//! Test Helper Utilities
//!
//! Shared fixtures and scripted collaborators for pcat-sync integration tests

#![allow(dead_code)]

pub mod catalog_fixture;
pub mod log_capture;
pub mod mock_clients;

pub use catalog_fixture::{fast_params, CatalogFixture};
pub use log_capture::{init_test_logging, LogCapture};
pub use mock_clients::{Behavior, MockFetcher, ScriptedAnalysisClient};
