//! Live progress tracker — ephemeral per-worker snapshots for polling.
//!
//! Process-local and never authoritative: it is rebuilt from the checkpoint
//! store on restart and exists only so dashboards can poll cheaply without
//! touching the durable store.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checkpoint::WorkerCheckpoint;

/// Snapshot of one worker's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveProgress {
    pub stream: String,
    pub worker_id: u32,
    pub current_block: u64,
    /// Target the worker is scanning toward (range end or chain head).
    pub target_block: u64,
    pub range_start: u64,
    pub range_end: Option<u64>,
    pub events_indexed: u64,
    pub entities_found: u64,
    pub started_at: DateTime<Utc>,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LiveProgress {
    /// Percent of the assigned range covered, clamped to `[0, 100]`.
    pub fn percent_complete(&self) -> f64 {
        let end = match self.range_end {
            Some(end) => end,
            None => self.target_block,
        };
        let span = end.saturating_sub(self.range_start);
        if span == 0 {
            return 100.0;
        }
        let done = self.current_block.saturating_sub(self.range_start);
        (done as f64 / span as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Blocks left before the worker reaches its target.
    pub fn remaining_blocks(&self) -> u64 {
        self.target_block.saturating_sub(self.current_block)
    }
}

/// Aggregated view across all workers of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedProgress {
    pub stream: String,
    pub workers: Vec<LiveProgress>,
    pub total_events_indexed: u64,
    pub total_entities_found: u64,
    /// Mean of per-worker completion percentages.
    pub percent_complete: f64,
}

/// In-process registry of live progress, keyed by `(stream, worker_id)`.
///
/// Owned by the scheduler and shared by handle with every worker task; no
/// ambient global state.
#[derive(Default)]
pub struct ProgressRegistry {
    entries: Mutex<HashMap<(String, u32), LiveProgress>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror a checkpoint into the live view after a batch.
    pub fn update_from_checkpoint(&self, cp: &WorkerCheckpoint, target_block: u64) {
        let key = (cp.stream.clone(), cp.worker_id);
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key).or_insert_with(|| LiveProgress {
            stream: cp.stream.clone(),
            worker_id: cp.worker_id,
            current_block: cp.last_indexed_block,
            target_block,
            range_start: cp.range_start,
            range_end: cp.range_end,
            events_indexed: 0,
            entities_found: 0,
            started_at: Utc::now(),
            last_batch_at: None,
            completed_at: None,
        });
        entry.current_block = cp.last_indexed_block;
        entry.target_block = target_block;
        entry.range_start = cp.range_start;
        entry.range_end = cp.range_end;
        entry.events_indexed = cp.total_events_indexed;
        entry.entities_found = cp.total_entities_found;
        entry.last_batch_at = Some(Utc::now());
        if cp.last_indexed_block >= target_block {
            entry.completed_at.get_or_insert_with(Utc::now);
        } else {
            // A steal reassignment reopens a finished worker.
            entry.completed_at = None;
        }
    }

    /// Snapshot of one worker.
    pub fn get(&self, stream: &str, worker_id: u32) -> Option<LiveProgress> {
        self.entries
            .lock()
            .unwrap()
            .get(&(stream.to_string(), worker_id))
            .cloned()
    }

    /// Snapshots of all workers of a stream, ordered by worker id.
    pub fn stream_workers(&self, stream: &str) -> Vec<LiveProgress> {
        let mut workers: Vec<_> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.stream == stream)
            .cloned()
            .collect();
        workers.sort_by_key(|p| p.worker_id);
        workers
    }

    /// Aggregated progress across a stream's workers.
    pub fn aggregate(&self, stream: &str) -> AggregatedProgress {
        let workers = self.stream_workers(stream);
        let total_events_indexed = workers.iter().map(|w| w.events_indexed).sum();
        let total_entities_found = workers.iter().map(|w| w.entities_found).sum();
        let percent_complete = if workers.is_empty() {
            0.0
        } else {
            workers.iter().map(|w| w.percent_complete()).sum::<f64>() / workers.len() as f64
        };
        AggregatedProgress {
            stream: stream.to_string(),
            workers,
            total_events_indexed,
            total_entities_found,
            percent_complete,
        }
    }

    /// Drop all entries for a stream (stream reset / restart).
    pub fn clear_stream(&self, stream: &str) {
        self.entries.lock().unwrap().retain(|(s, _), _| s != stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::WorkerCheckpoint;

    fn progress(current: u64, start: u64, end: Option<u64>, target: u64) -> LiveProgress {
        LiveProgress {
            stream: "pool-1".into(),
            worker_id: 0,
            current_block: current,
            target_block: target,
            range_start: start,
            range_end: end,
            events_indexed: 0,
            entities_found: 0,
            started_at: Utc::now(),
            last_batch_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn percent_complete_clamped() {
        assert_eq!(progress(50, 0, Some(100), 100).percent_complete(), 50.0);
        assert_eq!(progress(150, 0, Some(100), 100).percent_complete(), 100.0);
        // Zero-width range counts as done
        assert_eq!(progress(10, 10, Some(10), 10).percent_complete(), 100.0);
    }

    #[test]
    fn percent_complete_open_ended_uses_target() {
        // Open-ended range: percent is measured against the live target
        let p = progress(750_500, 750_000, None, 751_000);
        assert_eq!(p.percent_complete(), 50.0);
    }

    #[test]
    fn registry_mirrors_checkpoint() {
        let registry = ProgressRegistry::new();
        let mut cp = WorkerCheckpoint::new("pool-1", 1, 0, Some(1_000));
        cp.last_indexed_block = 400;
        cp.total_events_indexed = 12;

        registry.update_from_checkpoint(&cp, 1_000);

        let p = registry.get("pool-1", 1).unwrap();
        assert_eq!(p.current_block, 400);
        assert_eq!(p.events_indexed, 12);
        assert!(p.completed_at.is_none());
        assert!(p.last_batch_at.is_some());
    }

    #[test]
    fn registry_marks_completion_and_reopens() {
        let registry = ProgressRegistry::new();
        let mut cp = WorkerCheckpoint::new("pool-1", 0, 0, Some(1_000));
        cp.last_indexed_block = 1_000;
        registry.update_from_checkpoint(&cp, 1_000);
        assert!(registry.get("pool-1", 0).unwrap().completed_at.is_some());

        // Steal reassignment: worker gets a new range, completion clears
        cp.range_start = 130_000;
        cp.range_end = Some(250_000);
        cp.last_indexed_block = 130_000;
        registry.update_from_checkpoint(&cp, 250_000);
        assert!(registry.get("pool-1", 0).unwrap().completed_at.is_none());
    }

    #[test]
    fn aggregate_averages_percentages() {
        let registry = ProgressRegistry::new();
        let mut a = WorkerCheckpoint::new("pool-1", 0, 0, Some(100));
        a.last_indexed_block = 100;
        registry.update_from_checkpoint(&a, 100);

        let b = WorkerCheckpoint::new("pool-1", 1, 0, Some(100));
        registry.update_from_checkpoint(&b, 100);

        let agg = registry.aggregate("pool-1");
        assert_eq!(agg.workers.len(), 2);
        assert_eq!(agg.percent_complete, 50.0);
    }

    #[test]
    fn clear_stream_is_scoped() {
        let registry = ProgressRegistry::new();
        registry.update_from_checkpoint(&WorkerCheckpoint::new("a", 0, 0, None), 100);
        registry.update_from_checkpoint(&WorkerCheckpoint::new("b", 0, 0, None), 100);
        registry.clear_stream("a");
        assert!(registry.get("a", 0).is_none());
        assert!(registry.get("b", 0).is_some());
    }
}
