//! Enrichment scheduler
//!
//! Sends every pending record to the analysis service with bounded
//! concurrency and writes the outcome back into the catalog store.
//!
//! # Execution model
//! - `workers` slots, each running at most one attempt at a time. A slot
//!   keeps its own pacing state: consecutive requests from one slot are at
//!   least `request_spacing` apart, and a transient failure holds the slot
//!   for `transient_pause` before its next request.
//! - Attempts are futures polled by the run loop itself. The loop is the only
//!   code touching the store, so checkpoints never race with record updates.
//! - Every `checkpoint_interval` finalized records the snapshot is saved; a
//!   final save always happens when the run ends.
//! - Cancellation stops dispatch. Attempts already talking to the service
//!   finish and their results are kept; attempts still waiting on pacing are
//!   dropped and their records stay pending.
//!
//! # Outcomes
//! - success → structured result stored
//! - permanent failure → failure marker stored, never retried automatically
//! - transient failure → record stays pending (counter bumped) until the
//!   configured ceiling turns it into `transient_retries_exhausted`

pub mod response;
pub mod statistics;

pub use statistics::EnrichmentStats;

use crate::models::{Analysis, AnalysisResult, EnrichmentParameters, FailureMarker, FailureReason};
use crate::services::analysis_client::{mime_type_for, AnalysisClient, AnalysisRequest};
use crate::services::catalog_store::CatalogStore;
use base64::Engine;
use futures::stream::{FuturesUnordered, StreamExt};
use pcat_common::events::{CatalogEvent, EventBus, ItemStatus};
use pcat_common::Result;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result of one analysis attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    /// Structured analysis obtained
    Success(AnalysisResult),
    /// Terminal failure; stored as-is
    PermanentFailure(FailureMarker),
    /// Retry-worthy failure; the record stays pending
    TransientFailure { details: String },
}

/// A pending record handed to a worker slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub filename: String,
    pub local_path: String,
}

/// Per-slot pacing state
#[derive(Debug, Clone, Copy)]
struct WorkerSlot {
    id: usize,
    not_before: Instant,
}

/// Enrichment scheduler
pub struct EnrichmentScheduler {
    client: Arc<dyn AnalysisClient>,
    params: EnrichmentParameters,
    event_bus: Option<EventBus>,
}

impl EnrichmentScheduler {
    pub fn new(client: Arc<dyn AnalysisClient>, params: EnrichmentParameters) -> Self {
        Self {
            client,
            params,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn params(&self) -> &EnrichmentParameters {
        &self.params
    }

    /// Records with no stored analysis, in store order, capped at `limit`
    pub fn select_candidates(store: &CatalogStore, limit: Option<usize>) -> Vec<Candidate> {
        store
            .iter()
            .filter(|r| r.is_pending())
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| Candidate {
                filename: r.filename.clone(),
                local_path: r.local_path.clone(),
            })
            .collect()
    }

    /// Analyze every pending record in `store`
    ///
    /// Returns an error only when a snapshot save fails; everything else is
    /// recorded per item.
    pub async fn run(
        &self,
        store: &mut CatalogStore,
        cancel_token: CancellationToken,
    ) -> Result<EnrichmentStats> {
        let started = std::time::Instant::now();
        let run_id = Uuid::new_v4();
        let candidates = Self::select_candidates(store, self.params.limit);

        let mut stats = EnrichmentStats {
            run_id,
            candidates: candidates.len(),
            ..EnrichmentStats::default()
        };

        tracing::info!(
            run_id = %run_id,
            candidates = candidates.len(),
            workers = self.params.workers,
            checkpoint_interval = self.params.checkpoint_interval,
            "Starting enrichment run"
        );
        self.emit(CatalogEvent::EnrichmentStarted {
            run_id,
            candidates: candidates.len(),
            workers: self.params.workers,
            timestamp: chrono::Utc::now(),
        });

        let mut queue = candidates.into_iter();
        let mut in_flight = FuturesUnordered::new();

        // Seed one attempt per slot
        let now = Instant::now();
        for id in 0..self.params.workers.max(1) {
            match queue.next() {
                Some(candidate) => in_flight.push(self.attempt(
                    WorkerSlot { id, not_before: now },
                    candidate,
                    cancel_token.clone(),
                )),
                None => break,
            }
        }

        let checkpoint_every = self.params.checkpoint_interval.max(1);
        let mut finalized = 0usize;
        while let Some((slot, filename, outcome)) = in_flight.next().await {
            match outcome {
                Some(outcome) => {
                    stats.completed += 1;
                    if self.apply(store, run_id, &filename, outcome, &mut stats) {
                        finalized += 1;
                        if finalized % checkpoint_every == 0 {
                            store.save()?;
                            stats.checkpoints += 1;
                            tracing::info!(run_id = %run_id, finalized, "Checkpoint saved");
                            self.emit(CatalogEvent::CheckpointSaved { run_id, finalized });
                        }
                    }
                }
                None => {
                    tracing::debug!(worker = slot.id, filename = %filename, "Attempt dropped before dispatch");
                }
            }

            if cancel_token.is_cancelled() {
                continue;
            }
            if let Some(candidate) = queue.next() {
                in_flight.push(self.attempt(slot, candidate, cancel_token.clone()));
            }
        }

        stats.cancelled = cancel_token.is_cancelled() && stats.completed < stats.candidates;
        if stats.cancelled {
            tracing::warn!(
                run_id = %run_id,
                not_dispatched = stats.not_dispatched(),
                "Enrichment cancelled, remaining records stay pending"
            );
        }

        store.save()?;
        stats.elapsed = started.elapsed();

        tracing::info!(run_id = %run_id, "Enrichment run finished: {}", stats.display_string());
        self.emit(CatalogEvent::EnrichmentCompleted {
            run_id,
            succeeded: stats.succeeded,
            failed: stats.failed,
            deferred: stats.deferred,
            elapsed_ms: stats.elapsed.as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });

        Ok(stats)
    }

    /// Write one outcome into the store; true when the record was finalized
    fn apply(
        &self,
        store: &mut CatalogStore,
        run_id: Uuid,
        filename: &str,
        outcome: AnalysisOutcome,
        stats: &mut EnrichmentStats,
    ) -> bool {
        let Some(record) = store.get_mut(filename) else {
            tracing::error!(filename = %filename, "Analyzed record vanished from the store");
            return false;
        };

        let status = match outcome {
            AnalysisOutcome::Success(result) => {
                tracing::info!(
                    filename = %filename,
                    keywords = result.keywords.len(),
                    ocr_chars = result.ocr_text.chars().count(),
                    "Record analyzed"
                );
                record.ai_analysis = Some(Analysis::Success(result));
                record.transient_failures = 0;
                stats.succeeded += 1;
                ItemStatus::Succeeded
            }
            AnalysisOutcome::PermanentFailure(marker) => {
                tracing::warn!(filename = %filename, reason = %marker.error, "Record finalized as failed");
                let reason = marker.error.to_string();
                record.ai_analysis = Some(Analysis::Failure(marker));
                record.transient_failures = 0;
                stats.failed += 1;
                ItemStatus::Failed { reason }
            }
            AnalysisOutcome::TransientFailure { details } => {
                record.transient_failures += 1;
                if self.params.retries_exhausted(record.transient_failures) {
                    tracing::warn!(
                        filename = %filename,
                        failures = record.transient_failures,
                        "Transient failure ceiling reached, finalizing record"
                    );
                    let marker = FailureMarker::new(FailureReason::TransientRetriesExhausted)
                        .with_details(details);
                    record.ai_analysis = Some(Analysis::Failure(marker));
                    record.transient_failures = 0;
                    stats.failed += 1;
                    ItemStatus::Failed {
                        reason: FailureReason::TransientRetriesExhausted.to_string(),
                    }
                } else {
                    tracing::warn!(
                        filename = %filename,
                        failures = record.transient_failures,
                        details = %details,
                        "Transient failure, record left pending for a later run"
                    );
                    stats.deferred += 1;
                    ItemStatus::Deferred
                }
            }
        };

        let finalized = !matches!(status, ItemStatus::Deferred);
        self.emit(CatalogEvent::ItemAnalyzed {
            run_id,
            filename: filename.to_string(),
            status,
            completed: stats.completed,
            total: stats.candidates,
        });
        finalized
    }

    /// One attempt on `slot`; `None` when cancelled before the request went out
    async fn attempt(
        &self,
        mut slot: WorkerSlot,
        candidate: Candidate,
        cancel_token: CancellationToken,
    ) -> (WorkerSlot, String, Option<AnalysisOutcome>) {
        let request = match encode_asset(&candidate.local_path).await {
            Ok(request) => request,
            Err(marker) => {
                tracing::warn!(
                    filename = %candidate.filename,
                    path = %candidate.local_path,
                    details = ?marker.details,
                    "Asset could not be read"
                );
                return (slot, candidate.filename, Some(AnalysisOutcome::PermanentFailure(marker)));
            }
        };

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return (slot, candidate.filename, None),
            _ = tokio::time::sleep_until(slot.not_before) => {}
        }

        let request_started = Instant::now();
        slot.not_before = request_started + self.params.request_spacing;

        tracing::debug!(worker = slot.id, filename = %candidate.filename, "Dispatching analysis request");
        let outcome =
            match tokio::time::timeout(self.params.request_timeout, self.client.analyze(request)).await {
                Err(_) => AnalysisOutcome::TransientFailure {
                    details: format!("request timed out after {:?}", self.params.request_timeout),
                },
                Ok(Err(e)) if e.is_transient() => AnalysisOutcome::TransientFailure {
                    details: e.to_string(),
                },
                Ok(Err(e)) => AnalysisOutcome::PermanentFailure(
                    FailureMarker::new(FailureReason::GeneralApiError).with_details(e.to_string()),
                ),
                Ok(Ok(reply)) => match response::interpret(&reply, &candidate.filename) {
                    Ok(result) => AnalysisOutcome::Success(result),
                    Err(marker) => AnalysisOutcome::PermanentFailure(marker),
                },
            };

        if matches!(outcome, AnalysisOutcome::TransientFailure { .. }) {
            slot.not_before = slot.not_before.max(Instant::now() + self.params.transient_pause);
        }

        (slot, candidate.filename, Some(outcome))
    }

    fn emit(&self, event: CatalogEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

/// Read and base64-encode an asset
async fn encode_asset(local_path: &str) -> std::result::Result<AnalysisRequest, FailureMarker> {
    if local_path.trim().is_empty() {
        return Err(FailureMarker::new(FailureReason::EncodingFailed)
            .with_details("record has no local path"));
    }

    let bytes = tokio::fs::read(local_path).await.map_err(|e| {
        FailureMarker::new(FailureReason::EncodingFailed).with_details(e.to_string())
    })?;

    Ok(AnalysisRequest {
        image_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        mime_type: mime_type_for(local_path).to_string(),
    })
}
