//! Orchestration of the history jobs over a store and a quote source

pub mod compaction;
pub mod price_sync;
pub mod scheduler;
pub mod split_adjust;
pub mod split_detect;

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub use compaction::{CompactionReport, compact_all};
pub use price_sync::{OwnerSyncReport, SyncReport, SyncTarget, sync_all};
pub use split_adjust::{AdjustReport, adjust_splits, request_rollback};
pub use split_detect::{DetectReport, detect_splits};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Sync,
    Compaction,
    SplitDetect,
    SplitAdjust,
}

impl Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                JobKind::Sync => "sync",
                JobKind::Compaction => "compaction",
                JobKind::SplitDetect => "split detection",
                JobKind::SplitAdjust => "split adjustment",
            }
        )
    }
}

impl JobKind {
    /// Kinds that rewrite the same stored samples and must not overlap.
    fn conflicts_with(self, other: JobKind) -> bool {
        matches!(
            (self, other),
            (JobKind::Compaction, JobKind::SplitAdjust) | (JobKind::SplitAdjust, JobKind::Compaction)
        )
    }
}

/// Allows at most one run of each [`JobKind`] at a time, and never
/// compaction together with split adjustment.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    running: Arc<Mutex<HashSet<JobKind>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `kind`, or returns `None` while another run of it or of a
    /// conflicting kind holds a claim. The claim is released when the guard
    /// is dropped.
    pub fn try_begin(&self, kind: JobKind) -> Option<FlightGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(blocker) = running.iter().find(|r| kind.conflicts_with(**r)) {
            debug!(job = %kind, blocked_by = %blocker, "Conflicting job running");
            return None;
        }
        if !running.insert(kind) {
            debug!(job = %kind, "Job already running");
            return None;
        }
        Some(FlightGuard {
            running: Arc::clone(&self.running),
            kind,
        })
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
    }
}

pub struct FlightGuard {
    running: Arc<Mutex<HashSet<JobKind>>>,
    kind: JobKind,
}

impl FlightGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.kind);
    }
}
