//! Enrichment run statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Counters for one enrichment run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentStats {
    pub run_id: Uuid,
    /// Pending records selected for this run
    pub candidates: usize,
    /// Records whose outcome came back from a worker
    pub completed: usize,
    /// Records that now hold a structured analysis
    pub succeeded: usize,
    /// Records that now hold a failure marker
    pub failed: usize,
    /// Transient failures left pending for a later run
    pub deferred: usize,
    /// Mid-run snapshot saves (the final save is not counted)
    pub checkpoints: usize,
    /// Run stopped before every candidate was dispatched
    pub cancelled: bool,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl EnrichmentStats {
    /// Records that left the pending state during this run
    pub fn finalized(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Candidates never handed to a worker (cancellation)
    pub fn not_dispatched(&self) -> usize {
        self.candidates.saturating_sub(self.completed)
    }

    /// Display: "N analyzed, M failed, D deferred of C candidates in Xs"
    pub fn display_string(&self) -> String {
        let mut text = format!(
            "{} analyzed, {} failed, {} deferred of {} candidates in {:.1}s",
            self.succeeded,
            self.failed,
            self.deferred,
            self.candidates,
            self.elapsed.as_secs_f64()
        );
        if self.cancelled {
            text.push_str(&format!(" (cancelled, {} not dispatched)", self.not_dispatched()));
        }
        text
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
