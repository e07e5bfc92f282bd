//! Event types for catalog progress reporting
//!
//! Provides the shared event definitions and the broadcast EventBus used by
//! source sync and the enrichment scheduler to report per-item progress.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Final state of one enrichment attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemStatus {
    /// Structured analysis stored
    Succeeded,
    /// Permanent failure marker stored
    Failed {
        /// Reason code written to the record
        reason: String,
    },
    /// Transient failure; record stays pending for a later run
    Deferred,
}

/// Catalog event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogEvent {
    /// Source sync finished merging harvested rows
    SyncCompleted {
        created: usize,
        updated: usize,
        skipped: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Enrichment run selected its candidates and is about to dispatch
    EnrichmentStarted {
        run_id: Uuid,
        candidates: usize,
        workers: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One record came back from a worker
    ItemAnalyzed {
        run_id: Uuid,
        filename: String,
        status: ItemStatus,
        /// Items returned so far in this run (including deferred ones)
        completed: usize,
        /// Items dispatched in this run
        total: usize,
    },

    /// Catalog snapshot persisted mid-run
    CheckpointSaved {
        run_id: Uuid,
        /// Finalized items at the time of the checkpoint
        finalized: usize,
    },

    /// Enrichment run finished and the final snapshot was written
    EnrichmentCompleted {
        run_id: Uuid,
        succeeded: usize,
        failed: usize,
        deferred: usize,
        elapsed_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for [`CatalogEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CatalogEvent,
    ) -> Result<usize, broadcast::error::SendError<CatalogEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CatalogEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
