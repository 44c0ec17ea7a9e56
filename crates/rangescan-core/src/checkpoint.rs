//! Checkpoint store — persists each worker's position for crash recovery.
//!
//! One checkpoint row exists per worker identity (`{stream}_{worker_id}`).
//! On restart a worker resumes from `last_indexed_block + 1`; the sink's
//! idempotent upserts absorb any re-delivered events, so recovery costs at
//! most one batch of re-processing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Lifecycle state of a worker's checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Created but not yet running (or reassigned by a steal).
    Idle,
    /// Actively consuming batches.
    Running,
    /// Drained its assigned range.
    Complete,
    /// Last batch failed; retried from the same position on the next tick.
    Error,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A persisted per-worker checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCheckpoint {
    /// Logical stream (partition key, e.g. a pool id). Workers of different
    /// streams never share checkpoints.
    pub stream: String,
    /// Worker index within the stream.
    pub worker_id: u32,
    /// Start of the assigned range (inclusive of `range_start + 1` onward;
    /// `last_indexed_block` is initialized to `range_start`).
    pub range_start: u64,
    /// End of the assigned range; `None` = open-ended, track the chain head.
    /// Mutable by the work-stealing coordinator.
    pub range_end: Option<u64>,
    /// Highest block fully processed and persisted.
    pub last_indexed_block: u64,
    pub status: WorkerStatus,
    /// Monotonically non-decreasing counters.
    pub total_events_indexed: u64,
    pub total_entities_found: u64,
    /// Last failure message; cleared on the next successful batch.
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerCheckpoint {
    /// Create a fresh checkpoint at the start of its range.
    pub fn new(stream: impl Into<String>, worker_id: u32, range_start: u64, range_end: Option<u64>) -> Self {
        Self {
            stream: stream.into(),
            worker_id,
            range_start,
            range_end,
            last_indexed_block: range_start,
            status: WorkerStatus::Idle,
            total_events_indexed: 0,
            total_entities_found: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Unique identity used for checkpoint keys and re-entrancy guards.
    pub fn indexer_name(&self) -> String {
        indexer_name(&self.stream, self.worker_id)
    }

    /// The worker's target block given the current chain head.
    ///
    /// Open-ended ranges track the head; bounded ranges never exceed it.
    pub fn target_block(&self, chain_head: u64) -> u64 {
        self.range_end.unwrap_or(chain_head).min(chain_head)
    }

    /// Blocks left before this worker reaches `target`.
    pub fn remaining(&self, target: u64) -> u64 {
        target.saturating_sub(self.last_indexed_block)
    }
}

/// Checkpoint key for a `(stream, worker)` pair.
pub fn indexer_name(stream: &str, worker_id: u32) -> String {
    format!("{stream}_{worker_id}")
}

/// A chunk whose fetch failed and was skipped, persisted for later backfill.
///
/// The batch scanner advances `last_indexed_block` past failed chunks; the
/// gap list is the durable record of what was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageGap {
    pub stream: String,
    pub worker_id: u32,
    /// First block of the skipped chunk (inclusive).
    pub from_block: u64,
    /// Last block of the skipped chunk (inclusive).
    pub to_block: u64,
    /// Error that caused the skip.
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// Trait for storing and loading worker checkpoints.
///
/// Implementations include `MemoryCheckpointStore` (tests) and the backends
/// in `rangescan-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for one worker, if it exists.
    async fn load(&self, stream: &str, worker_id: u32) -> Result<Option<WorkerCheckpoint>, ScanError>;

    /// Save (upsert) a checkpoint. Must be durable before returning.
    async fn save(&self, checkpoint: WorkerCheckpoint) -> Result<(), ScanError>;

    /// Delete one worker's checkpoint (used by stream reset).
    async fn delete(&self, stream: &str, worker_id: u32) -> Result<(), ScanError>;

    /// All checkpoints for a stream, ordered by worker id.
    async fn list(&self, stream: &str) -> Result<Vec<WorkerCheckpoint>, ScanError>;

    /// Record a skipped chunk for later backfill.
    async fn record_gap(&self, gap: CoverageGap) -> Result<(), ScanError>;

    /// All recorded gaps for a stream, ordered by `from_block`.
    async fn gaps(&self, stream: &str) -> Result<Vec<CoverageGap>, ScanError>;
}

// ─── In-memory store (for testing) ───────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral scans.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, WorkerCheckpoint>>,
    gaps: Mutex<Vec<CoverageGap>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, stream: &str, worker_id: u32) -> Result<Option<WorkerCheckpoint>, ScanError> {
        let key = indexer_name(stream, worker_id);
        Ok(self.checkpoints.lock().unwrap().get(&key).cloned())
    }

    async fn save(&self, checkpoint: WorkerCheckpoint) -> Result<(), ScanError> {
        let key = checkpoint.indexer_name();
        self.checkpoints.lock().unwrap().insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, stream: &str, worker_id: u32) -> Result<(), ScanError> {
        let key = indexer_name(stream, worker_id);
        self.checkpoints.lock().unwrap().remove(&key);
        Ok(())
    }

    async fn list(&self, stream: &str) -> Result<Vec<WorkerCheckpoint>, ScanError> {
        let mut out: Vec<_> = self
            .checkpoints
            .lock()
            .unwrap()
            .values()
            .filter(|cp| cp.stream == stream)
            .cloned()
            .collect();
        out.sort_by_key(|cp| cp.worker_id);
        Ok(out)
    }

    async fn record_gap(&self, gap: CoverageGap) -> Result<(), ScanError> {
        self.gaps.lock().unwrap().push(gap);
        Ok(())
    }

    async fn gaps(&self, stream: &str) -> Result<Vec<CoverageGap>, ScanError> {
        let mut out: Vec<_> = self
            .gaps
            .lock()
            .unwrap()
            .iter()
            .filter(|g| g.stream == stream)
            .cloned()
            .collect();
        out.sort_by_key(|g| g.from_block);
        Ok(out)
    }
}
