//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every field has a
//! built-in default, so a missing file is equivalent to an empty one.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (`--root-folder`, `--snapshot`, ...)
//! 2. Environment variables (`PCAT_ROOT_FOLDER`, `PCAT_CONFIG`)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "PCAT_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "PCAT_ROOT_FOLDER";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder that relative catalog paths resolve against
    pub root_folder: Option<PathBuf>,

    /// API key for the analysis service (environment variables take priority)
    pub analysis_api_key: Option<String>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Catalog store and source sync settings
    pub catalog: CatalogConfig,

    /// Enrichment scheduler settings
    pub enrichment: EnrichmentConfig,

    /// Analysis service request settings
    pub analysis: AnalysisConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Catalog store and source sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Snapshot file (relative to root folder unless absolute)
    pub snapshot: PathBuf,

    /// Directory downloaded assets are stored in (relative to root folder unless absolute)
    pub assets_dir: PathBuf,

    /// Base URL of the public display page; locator is `{base}/{year}/1/{position}`
    pub display_base_url: String,

    /// Number of asset downloads verified concurrently during source sync
    pub download_concurrency: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            snapshot: PathBuf::from("image_metadata.json"),
            assets_dir: PathBuf::from("images"),
            display_base_url: "https://egonzippel.com/polaroids".to_string(),
            download_concurrency: 4,
        }
    }
}

/// Enrichment scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Number of concurrent analysis workers
    pub workers: usize,

    /// Persist the catalog after every N finalized items
    pub checkpoint_interval: usize,

    /// Pause taken by a worker after a transient service failure (seconds)
    pub transient_pause_secs: u64,

    /// Minimum spacing between two requests issued by the same worker (milliseconds)
    pub request_spacing_ms: u64,

    /// Upper bound on a single analysis call (seconds)
    pub request_timeout_secs: u64,

    /// Transient failures tolerated per record before it is finalized as failed (0 = unlimited)
    pub max_transient_failures: u32,

    /// Optional process-wide request budget
    pub requests_per_minute: Option<u32>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            checkpoint_interval: 10,
            transient_pause_secs: 60,
            request_spacing_ms: 1000,
            request_timeout_secs: 120,
            max_transient_failures: 5,
            requests_per_minute: None,
        }
    }
}

/// Analysis service request settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Model name sent with every request
    pub model: String,

    /// Sampling temperature (kept low for stable JSON output)
    pub temperature: f32,

    /// Output length cap
    pub max_tokens: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai/".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

/// Resolve the config file path
///
/// Priority: explicit path → `PCAT_CONFIG` → `<config dir>/pcat/config.toml`.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("pcat").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Load TOML configuration, falling back to defaults when the file is missing
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(TomlConfig::default());
        }
        Err(e) => return Err(Error::Config(format!("Read TOML failed: {}", e))),
    };

    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    validate(&config)?;
    Ok(config)
}

/// Write TOML configuration atomically
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::fs::write_atomic(path, content.as_bytes())
}

fn validate(config: &TomlConfig) -> Result<()> {
    if config.enrichment.workers == 0 {
        return Err(Error::Config("enrichment.workers must be at least 1".to_string()));
    }
    if config.enrichment.checkpoint_interval == 0 {
        return Err(Error::Config(
            "enrichment.checkpoint_interval must be at least 1".to_string(),
        ));
    }
    if config.catalog.download_concurrency == 0 {
        return Err(Error::Config(
            "catalog.download_concurrency must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Root folder resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root_folder) = &toml_config.root_folder {
        return root_folder.clone();
    }

    get_default_root_folder()
}

/// Resolve `path` against `root` unless it is already absolute
pub fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("pcat"))
        .unwrap_or_else(|| PathBuf::from("./pcat_data"))
}

/// User-Agent string for outbound HTTP requests
pub fn get_user_agent() -> String {
    format!("pcat/{}", env!("CARGO_PKG_VERSION"))
}
