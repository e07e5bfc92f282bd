//! Configuration resolution for pcat
//!
//! Multi-tier resolution of the analysis API key: ENV → TOML, with the
//! project-specific variable ahead of the provider's conventional one.

use pcat_common::config::TomlConfig;
use pcat_common::{Error, Result};
use tracing::{info, warn};

/// Project-specific API key variable (highest priority)
pub const API_KEY_ENV_VAR: &str = "PCAT_ANALYSIS_API_KEY";

/// Provider's conventional API key variable
pub const PROVIDER_API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

/// Resolve the analysis API key
///
/// **Priority:** `PCAT_ANALYSIS_API_KEY` → `GEMINI_API_KEY` → TOML
pub fn resolve_analysis_api_key(toml_config: &TomlConfig) -> Result<String> {
    let candidates = [
        (API_KEY_ENV_VAR, std::env::var(API_KEY_ENV_VAR).ok()),
        (PROVIDER_API_KEY_ENV_VAR, std::env::var(PROVIDER_API_KEY_ENV_VAR).ok()),
        ("TOML", toml_config.analysis_api_key.clone()),
    ];

    let sources: Vec<&str> = candidates
        .iter()
        .filter(|(_, key)| key.as_deref().is_some_and(is_valid_key))
        .map(|(source, _)| *source)
        .collect();

    if sources.len() > 1 {
        warn!(
            "Analysis API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    for (source, key) in candidates {
        if let Some(key) = key.filter(|k| is_valid_key(k)) {
            info!("Analysis API key loaded from {}", source);
            return Ok(key.trim().to_string());
        }
    }

    Err(Error::Config(format!(
        "Analysis API key not configured. Set one of:\n\
         1. Environment: {}=your-key\n\
         2. Environment: {}=your-key\n\
         3. TOML config: analysis_api_key = \"your-key\"",
        API_KEY_ENV_VAR, PROVIDER_API_KEY_ENV_VAR
    )))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
