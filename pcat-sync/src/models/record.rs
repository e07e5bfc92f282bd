//! Catalog record and enrichment state
//!
//! A [`Record`] is one cataloged artifact, keyed by its filename. Its
//! `ai_analysis` field is the enrichment state machine:
//!
//! ```text
//! None (PENDING) ──► Some(Analysis::Success)
//!                └─► Some(Analysis::Failure)
//! ```
//!
//! The field only moves forward; nothing in the pipeline resets it to `None`.
//! Values written by older tooling that fit neither shape load as
//! [`Analysis::Legacy`] and are written back unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One cataloged artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identity key (unique across the store)
    pub filename: String,

    /// Remote asset URL (absent for locally scanned files)
    #[serde(default)]
    pub source_url: Option<String>,

    /// Local asset path
    #[serde(default)]
    pub local_path: String,

    /// Four-digit year, zero-padded string
    pub year: String,

    /// Two-digit month (absent when the filename did not parse)
    #[serde(default)]
    pub month: Option<String>,

    /// Two-digit day (absent when the filename did not parse)
    #[serde(default)]
    pub day: Option<String>,

    /// Raw text between the date and the extension
    #[serde(default)]
    pub suffix_original: Option<String>,

    /// Derived sort key of the suffix
    #[serde(default)]
    pub sortable_suffix: Option<String>,

    /// Lowercased file extension
    #[serde(default)]
    pub extension: Option<String>,

    /// Zero-based position within the year, assigned by the indexer
    #[serde(default)]
    pub chronological_index_in_year: Option<usize>,

    /// Public display locator, assigned by the indexer
    #[serde(default)]
    pub display_page_url: Option<String>,

    /// Enrichment state (`None` = never attempted or deferred)
    #[serde(default)]
    pub ai_analysis: Option<Analysis>,

    /// Transient failures seen so far; cleared on success
    #[serde(default, skip_serializing_if = "is_zero")]
    pub transient_failures: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Record {
    /// New pending record with only identity, location and year populated
    pub fn new(filename: impl Into<String>, local_path: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source_url: None,
            local_path: local_path.into(),
            year: year.into(),
            month: None,
            day: None,
            suffix_original: None,
            sortable_suffix: None,
            extension: None,
            chronological_index_in_year: None,
            display_page_url: None,
            ai_analysis: None,
            transient_failures: 0,
        }
    }

    /// True while the record still needs analysis
    pub fn is_pending(&self) -> bool {
        self.ai_analysis.is_none()
    }

    /// Stored failure reason, if the record was finalized as failed
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match &self.ai_analysis {
            Some(Analysis::Failure(marker)) => Some(marker.error),
            _ => None,
        }
    }
}

/// Stored enrichment value: structured result or terminal failure marker
///
/// Untagged on the wire: a failure marker is recognised by its `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Analysis {
    Failure(FailureMarker),
    Success(AnalysisResult),
    /// Finalized value of some other shape (e.g. `keywords` stored as a string)
    Legacy(serde_json::Value),
}

impl Analysis {
    /// Best-effort text of a named field, for search and display
    pub fn text_field(&self, key: &str) -> String {
        match self {
            Analysis::Success(result) => match key {
                "ocr_text" => result.ocr_text.clone(),
                "visual_description" => result.visual_description.clone(),
                "keywords" => result.keywords.join(" "),
                _ => String::new(),
            },
            Analysis::Legacy(value) => flatten_text(&value[key]),
            Analysis::Failure(_) => String::new(),
        }
    }
}

fn flatten_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(flatten_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Structured analysis returned by the external service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Transcribed text (empty when the image has none)
    pub ocr_text: String,
    /// Short visual description
    pub visual_description: String,
    /// Short keyword strings
    pub keywords: Vec<String>,
}

/// Terminal failure stored on a record for manual follow-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMarker {
    /// Reason code
    pub error: FailureReason,

    /// Raw service response, when the failure is a malformed response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,

    /// Error text, when the failure came from an I/O or service error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// When the failure was recorded (RFC 3339 or epoch seconds on read)
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Epoch(f64),
        Text(String),
    }

    Ok(match Option::<RawTimestamp>::deserialize(deserializer)? {
        Some(RawTimestamp::Epoch(secs)) => from_epoch_secs(secs),
        Some(RawTimestamp::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        None => None,
    })
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = (((secs - whole) * 1e9) as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

impl FailureMarker {
    /// Marker stamped with the current time
    pub fn new(error: FailureReason) -> Self {
        Self {
            error,
            raw_content: None,
            details: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_raw_content(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Reason code of a terminal failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Asset bytes could not be read
    EncodingFailed,
    /// Response parsed but lacked a required field
    MissingKeys,
    /// Response was not valid JSON (or had wrongly typed fields)
    JsonDecodeError,
    /// Service returned no content and reported a length cut-off
    NoContentFinishLength,
    /// Service reply had no usable content
    UnexpectedStructure,
    /// Non-transient service error
    GeneralApiError,
    /// Transient failures exceeded the configured ceiling
    TransientRetriesExhausted,
    /// Reason code not known to this version
    #[serde(other)]
    Other,
}

impl FailureReason {
    /// Wire name of the reason code
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::EncodingFailed => "encoding_failed",
            FailureReason::MissingKeys => "missing_keys",
            FailureReason::JsonDecodeError => "json_decode_error",
            FailureReason::NoContentFinishLength => "no_content_finish_length",
            FailureReason::UnexpectedStructure => "unexpected_structure",
            FailureReason::GeneralApiError => "general_api_error",
            FailureReason::TransientRetriesExhausted => "transient_retries_exhausted",
            FailureReason::Other => "other",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
