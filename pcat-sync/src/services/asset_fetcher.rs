//! Asset download collaborator
//!
//! Ensures a remote asset exists at a local path. Idempotent: an existing
//! target is left untouched and no request is made. Downloads are staged in a
//! temp file beside the target and renamed into place, so a failed transfer
//! never leaves a partial image behind for a later run to trust.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default download budget (requests per second)
const DOWNLOADS_PER_SECOND: u32 = 2;

/// Asset download errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0} for {1}")]
    Status(u16, String),

    #[error("Empty response body for {0}")]
    EmptyBody(String),

    #[error("I/O error writing {0}: {1}")]
    Io(String, String),
}

/// Fetches an asset to a local path
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Make sure `target` holds the bytes behind `url`
    async fn ensure_asset(&self, url: &str, target: &Path) -> Result<(), FetchError>;
}

/// HTTP implementation of [`AssetFetcher`]
pub struct HttpAssetFetcher {
    client: Client,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpAssetFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(DOWNLOADS_PER_SECOND).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    async fn download(&self, url: &str, target: &Path) -> Result<(), FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %url, target = %target.display(), "Downloading asset");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16(), url.to_string()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody(url.to_string()));
        }

        write_staged(target, &bytes).await?;

        tracing::info!(
            url = %url,
            target = %target.display(),
            bytes = bytes.len(),
            "Asset downloaded"
        );
        Ok(())
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn ensure_asset(&self, url: &str, target: &Path) -> Result<(), FetchError> {
        if tokio::fs::try_exists(target).await.unwrap_or(false) {
            tracing::debug!(target = %target.display(), "Asset already present");
            return Ok(());
        }
        self.download(url, target).await
    }
}

/// Write `bytes` to `target` through a sibling temp file
async fn write_staged(target: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let io_err = |e: std::io::Error| FetchError::Io(target.display().to_string(), e.to_string());

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".to_string());
    let staging = target.with_file_name(format!(".{}.part", file_name));

    if let Err(e) = tokio::fs::write(&staging, bytes).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(io_err(e));
    }
    tokio::fs::rename(&staging, target).await.map_err(io_err)
}
