//! Image analysis service client
//!
//! Talks to an OpenAI-compatible chat completions endpoint: one user message
//! carrying the instruction text plus the image as a base64 data URL, with
//! JSON output requested. The client only transports; interpreting the reply
//! (fences, required keys, reason codes) happens in the enrichment scheduler.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use pcat_common::config::AnalysisConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// Instruction sent with every image
pub const ANALYSIS_PROMPT: &str = r#"Look at the attached image, a scanned instant-film sketch, and answer with one JSON object holding exactly these fields:
"ocr_text": every piece of text visible in the image, handwritten or drawn, as a single string. The artist usually signs "Egon", "Egon Zippel" or "Egon NYC"; transcribe such signatures like any other text. Use an empty string when there is no text.
"visual_description": one or two sentences on the subjects, style and notable visual elements. Avoid generic labels such as "sketch" or "drawing"; the description must tell this image apart from thousands of similar ones.
"keywords": a list of 3 to 7 short strings naming the themes, objects or concepts shown.

Example:
{"ocr_text": "Egon NYC", "visual_description": "A distorted face in profile against scribbled buildings.", "keywords": ["portrait", "profile", "city", "ink"]}

If the image is unreadable, still return the object with empty strings and an empty keyword list."#;

/// Substrings (lowercase) that mark a service error as transient
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "unavailable",
    "quota",
    "503",
    "429",
];

/// Analysis client errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AnalysisError {
    /// True when the error is worth retrying in a later attempt
    ///
    /// Timeouts always are; everything else is classified by its message.
    pub fn is_transient(&self) -> bool {
        if matches!(self, AnalysisError::Timeout(_)) {
            return true;
        }
        let message = self.to_string().to_lowercase();
        TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

/// One image to analyze
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Base64-encoded image bytes
    pub image_base64: String,
    /// MIME type of the image (`image/jpeg`, `image/png`)
    pub mime_type: String,
}

/// Raw reply of the service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReply {
    /// Text content of the first choice, if any
    pub content: Option<String>,
    /// Reported finish reason of the first choice (`stop`, `length`, ...)
    pub finish_reason: Option<String>,
}

impl AnalysisReply {
    pub fn truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// External image analysis service
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError>;
}

/// MIME type from a file extension (jpeg for anything unrecognized)
pub fn mime_type_for(path: &str) -> &'static str {
    let extension = std::path::Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        other => {
            tracing::debug!(path = %path, extension = %other, "Unknown image extension, assuming JPEG");
            "image/jpeg"
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP implementation of [`AnalysisClient`]
pub struct HttpAnalysisClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    config: AnalysisConfig,
    timeout: Duration,
    rate_limiter: Option<DirectLimiter>,
}

impl HttpAnalysisClient {
    /// Build a client
    ///
    /// `requests_per_minute` adds a process-wide request budget on top of the
    /// scheduler's per-worker spacing.
    pub fn new(
        api_key: String,
        config: AnalysisConfig,
        user_agent: &str,
        timeout: Duration,
        requests_per_minute: Option<NonZeroU32>,
    ) -> Result<Self, AnalysisError> {
        if api_key.trim().is_empty() {
            return Err(AnalysisError::Config("analysis API key is empty".to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Network(e.to_string()))?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            http_client,
            endpoint,
            api_key,
            config,
            timeout,
            rate_limiter: requests_per_minute.map(|n| RateLimiter::direct(Quota::per_minute(n))),
        })
    }

    fn request_body(&self, request: &AnalysisRequest) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": ANALYSIS_PROMPT},
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", request.mime_type, request.image_base64)
                        }
                    }
                ]
            }],
            "response_format": {"type": "json_object"},
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        tracing::debug!(model = %self.config.model, mime = %request.mime_type, "Requesting image analysis");

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(self.timeout)
                } else {
                    AnalysisError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api(status.as_u16(), body));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;

        Ok(reply_from(completion))
    }
}

fn reply_from(completion: ChatCompletion) -> AnalysisReply {
    match completion.choices.into_iter().next() {
        Some(choice) => AnalysisReply {
            content: choice.message.and_then(|m| m.content),
            finish_reason: choice.finish_reason,
        },
        None => AnalysisReply::default(),
    }
}
