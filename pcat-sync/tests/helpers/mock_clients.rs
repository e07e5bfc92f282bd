//! Scripted collaborators
//!
//! Fixture images contain their own filename as bytes, so the scripted
//! analysis client can tell which record a request belongs to by decoding
//! the base64 payload.

use async_trait::async_trait;
use base64::Engine;
use pcat_sync::services::analysis_client::{
    AnalysisClient, AnalysisError, AnalysisReply, AnalysisRequest,
};
use pcat_sync::services::asset_fetcher::{AssetFetcher, FetchError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted client does for one request
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Valid JSON whose OCR text is the filename
    Valid,
    /// Valid JSON wrapped in a fenced code block
    Fenced,
    /// Exactly this content, finish reason `stop`
    Raw(String),
    /// No content, finish reason `length`
    Truncated,
    /// Service error classified as transient
    Transient,
    /// Service error classified as permanent
    Permanent,
    /// Never answers
    Hang,
    /// Answer validly after a delay
    Slow(Duration),
}

type CallHook = Arc<dyn Fn(usize, &str) + Send + Sync>;

/// Analysis client driven by per-filename scripts
pub struct ScriptedAnalysisClient {
    default: Behavior,
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    on_call: Option<CallHook>,
}

impl ScriptedAnalysisClient {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            on_call: None,
        }
    }

    /// Every request answers validly
    pub fn valid() -> Self {
        Self::new(Behavior::Valid)
    }

    /// Queue behaviors for one filename; the default applies once they run out
    pub fn script(self, filename: &str, behaviors: Vec<Behavior>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(filename.to_string(), behaviors.into());
        self
    }

    /// Run `hook(call_number, filename)` at the start of every request (1-based)
    pub fn on_call(mut self, hook: impl Fn(usize, &str) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Arc::new(hook));
        self
    }

    /// Filenames requested so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of requests seen in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, filename: &str) -> Behavior {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(filename)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default.clone())
    }
}

pub fn valid_json(filename: &str) -> String {
    serde_json::json!({
        "ocr_text": filename,
        "visual_description": format!("Sketch stored as {}", filename),
        "keywords": ["sketch", "test"],
    })
    .to_string()
}

fn stop(content: String) -> AnalysisReply {
    AnalysisReply {
        content: Some(content),
        finish_reason: Some("stop".to_string()),
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisClient for ScriptedAnalysisClient {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReply, AnalysisError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&request.image_base64)
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;
        let filename = String::from_utf8_lossy(&bytes).into_owned();

        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(filename.clone());
            calls.len()
        };
        if let Some(hook) = &self.on_call {
            hook(call_number, &filename);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.next_behavior(&filename) {
            Behavior::Valid => Ok(stop(valid_json(&filename))),
            Behavior::Fenced => Ok(stop(format!("```json\n{}\n```", valid_json(&filename)))),
            Behavior::Raw(content) => Ok(stop(content)),
            Behavior::Truncated => Ok(AnalysisReply {
                content: None,
                finish_reason: Some("length".to_string()),
            }),
            Behavior::Transient => Err(AnalysisError::Api(
                503,
                "The model is overloaded. Please try again later. UNAVAILABLE".to_string(),
            )),
            Behavior::Permanent => Err(AnalysisError::Api(
                400,
                "Request contains an invalid argument".to_string(),
            )),
            Behavior::Hang => std::future::pending().await,
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(stop(valid_json(&filename)))
            }
        }
    }
}

/// Asset fetcher that writes the URL as file content
#[derive(Default)]
pub struct MockFetcher {
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fetch of `url` fail
    pub fn failing(self, url: &str) -> Self {
        self.failing.lock().unwrap().insert(url.to_string());
        self
    }

    /// URLs actually downloaded (existing targets are not counted)
    pub fn downloads(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn ensure_asset(&self, url: &str, target: &Path) -> Result<(), FetchError> {
        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Status(404, url.to_string()));
        }
        if target.exists() {
            return Ok(());
        }
        self.requests.lock().unwrap().push(url.to_string());
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FetchError::Io(parent.display().to_string(), e.to_string()))?;
        }
        std::fs::write(target, url.as_bytes())
            .map_err(|e| FetchError::Io(target.display().to_string(), e.to_string()))
    }
}
