//! # pcat common library
//!
//! Shared code for the catalog crates including:
//! - Error taxonomy (`Error`, `Result`)
//! - Configuration loading and root folder resolution
//! - Atomic file replacement
//! - Progress event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod fs;

pub use error::{Error, Result};
