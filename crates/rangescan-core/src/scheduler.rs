//! Scheduler — one phase-offset periodic task per worker.
//!
//! `start` partitions the block domain, persists the initial checkpoints,
//! and spawns the worker tasks. Each tick runs exactly one batch; overlap is
//! prevented by the scanner's re-entrancy guard, not by timer juggling. A
//! worker that completes its range asks the steal coordinator for more.
//!
//! Stopping sets a per-worker flag checked at tick boundaries: in-flight
//! batches run to completion, the task simply never ticks again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::partition::{apply_partitions, partition};
use crate::progress::{AggregatedProgress, LiveProgress, ProgressRegistry};
use crate::scanner::{BatchStatus, Scanner};
use crate::sink::RecordSink;
use crate::source::{EventSource, SourceFilter};
use crate::steal::StealCoordinator;

/// Consecutive chain-head failures tolerated before the failsafe reduces the
/// worker count.
const START_FAILURE_THRESHOLD: u32 = 2;

/// Result of a stop request. Stopping something that is not running is a
/// no-op, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotRunning,
}

/// Snapshot of the scheduler's active workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub active_workers: usize,
    pub per_worker: Vec<LiveProgress>,
}

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    _task: JoinHandle<()>,
}

/// Periodic driver for one or more scan streams.
pub struct Scheduler {
    store: Arc<dyn CheckpointStore>,
    source: Arc<dyn EventSource>,
    scanner: Arc<Scanner>,
    coordinator: Arc<StealCoordinator>,
    progress: Arc<ProgressRegistry>,
    config: ScanConfig,
    streams: Mutex<HashMap<String, HashMap<u32, WorkerHandle>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn RecordSink>,
        filter: SourceFilter,
        config: ScanConfig,
    ) -> Self {
        let progress = Arc::new(ProgressRegistry::new());
        let scanner = Arc::new(Scanner::new(
            store.clone(),
            source.clone(),
            sink,
            progress.clone(),
            filter,
            config.clone(),
        ));
        let coordinator = Arc::new(StealCoordinator::new(
            store.clone(),
            progress.clone(),
            config.min_steal_blocks,
            Duration::from_secs(config.reservation_ttl_secs),
        ));
        Self {
            store,
            source,
            scanner,
            coordinator,
            progress,
            config,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Start scanning `stream` with the configured worker count.
    ///
    /// Repeated chain-head failures trigger the failsafe: the attempt
    /// restarts with one worker fewer, down to `min_workers`, after which the
    /// error is returned. Returns the worker count actually started.
    pub async fn start(&self, stream: &str) -> Result<u32, ScanError> {
        self.config.validate()?;

        // Reserve the stream name before the first await: a concurrent start
        // for the same stream must fail fast, not spawn a second worker set.
        {
            let mut streams = self.streams.lock().unwrap();
            if streams.contains_key(stream) {
                return Err(ScanError::Other(format!("stream '{stream}' already running")));
            }
            streams.insert(stream.to_string(), HashMap::new());
        }

        match self.start_inner(stream).await {
            Ok((worker_count, handles)) => {
                let mut streams = self.streams.lock().unwrap();
                match streams.get_mut(stream) {
                    Some(entry) => *entry = handles,
                    // Stopped while still starting: honor the stop.
                    None => {
                        for handle in handles.values() {
                            handle.stop.store(true, Ordering::SeqCst);
                        }
                        return Err(ScanError::Other(format!(
                            "stream '{stream}' stopped during start"
                        )));
                    }
                }
                info!(stream, worker_count, "stream started");
                Ok(worker_count)
            }
            Err(err) => {
                self.streams.lock().unwrap().remove(stream);
                Err(err)
            }
        }
    }

    async fn start_inner(
        &self,
        stream: &str,
    ) -> Result<(u32, HashMap<u32, WorkerHandle>), ScanError> {
        let mut worker_count = self.config.worker_count;
        let mut failures = 0u32;
        let head = loop {
            match self.source.chain_head().await {
                Ok(head) => break head,
                Err(err) => {
                    failures += 1;
                    warn!(stream, failures, worker_count, %err, "worker start failed");
                    if failures > START_FAILURE_THRESHOLD {
                        if worker_count > self.config.min_workers {
                            worker_count -= 1;
                            failures = 0;
                            info!(stream, worker_count, "failsafe: reducing worker count");
                        } else {
                            return Err(err);
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(self.config.interval_ms)).await;
                }
            }
        };

        // Resume existing checkpoints when the layout matches; otherwise
        // re-partition (destructive by design).
        let existing = self.store.list(stream).await?;
        if existing.len() != worker_count as usize {
            let ranges = partition(self.config.genesis_block, head, worker_count);
            apply_partitions(self.store.as_ref(), stream, &ranges).await?;
            info!(stream, worker_count, head, "partitioned block domain");
        } else {
            info!(stream, worker_count, "resuming from existing checkpoints");
        }

        let interval = Duration::from_millis(self.config.interval_ms);
        let mut handles = HashMap::new();
        for worker_id in 0..worker_count {
            let stop = Arc::new(AtomicBool::new(false));
            let task = tokio::spawn(worker_loop(
                self.scanner.clone(),
                self.coordinator.clone(),
                stream.to_string(),
                worker_id,
                worker_count,
                interval,
                stop.clone(),
            ));
            handles.insert(worker_id, WorkerHandle { stop, _task: task });
        }
        Ok((worker_count, handles))
    }

    /// Stop every worker of `stream`. Idempotent.
    pub fn stop(&self, stream: &str) -> StopStatus {
        match self.streams.lock().unwrap().remove(stream) {
            Some(handles) => {
                for handle in handles.values() {
                    handle.stop.store(true, Ordering::SeqCst);
                }
                info!(stream, "stream stopped");
                StopStatus::Stopped
            }
            None => StopStatus::NotRunning,
        }
    }

    /// Stop a single worker of `stream`. Idempotent.
    pub fn stop_worker(&self, stream: &str, worker_id: u32) -> StopStatus {
        let mut streams = self.streams.lock().unwrap();
        match streams.get_mut(stream).and_then(|h| h.remove(&worker_id)) {
            Some(handle) => {
                handle.stop.store(true, Ordering::SeqCst);
                StopStatus::Stopped
            }
            None => StopStatus::NotRunning,
        }
    }

    /// Live progress of one worker.
    pub fn worker_progress(&self, stream: &str, worker_id: u32) -> Option<LiveProgress> {
        self.progress.get(stream, worker_id)
    }

    /// Aggregated live progress of a stream.
    pub fn stream_progress(&self, stream: &str) -> AggregatedProgress {
        self.progress.aggregate(stream)
    }

    /// Snapshot across every running stream.
    pub fn status(&self) -> SchedulerStatus {
        let streams = self.streams.lock().unwrap();
        let active_workers = streams.values().map(|h| h.len()).sum();
        let mut per_worker = Vec::new();
        for stream in streams.keys() {
            per_worker.extend(self.progress.stream_workers(stream));
        }
        SchedulerStatus {
            active_workers,
            per_worker,
        }
    }
}

async fn worker_loop(
    scanner: Arc<Scanner>,
    coordinator: Arc<StealCoordinator>,
    stream: String,
    worker_id: u32,
    worker_count: u32,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    // Phase offset: spreads the workers' RPC bursts across the interval.
    let offset = interval.mul_f64(worker_id as f64 / worker_count as f64);
    tokio::time::sleep(offset).await;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let outcome = scanner.run_batch(&stream, worker_id).await;
        if outcome.status == BatchStatus::Complete {
            if let Some(plan) = coordinator.try_steal(&stream, worker_id).await {
                debug!(
                    stream,
                    worker = worker_id,
                    donor = plan.donor_worker,
                    stolen = plan.stolen_blocks,
                    "idle worker reassigned via steal"
                );
            }
        }
    }
    debug!(stream, worker = worker_id, "worker loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{MemoryCheckpointStore, WorkerCheckpoint, WorkerStatus};
    use crate::testutil::{MockSink, MockSource};
    use std::time::Instant;

    fn fast_config(workers: u32) -> ScanConfig {
        ScanConfig::new()
            .worker_count(workers)
            .min_workers(1)
            .batch_size(1_000)
            .chunk_size(500)
            .chunk_delay_ms(0)
            .interval_ms(10)
            .min_steal_blocks(1_000)
    }

    fn scheduler_with(source: MockSource, sink: Arc<MockSink>, config: ScanConfig) -> Scheduler {
        Scheduler::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(source),
            sink,
            SourceFilter::default(),
            config,
        )
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn stream_scans_to_completion() {
        let sink = Arc::new(MockSink::new());
        let source = MockSource::new(5_000).event_every(100);
        let scheduler = Arc::new(scheduler_with(source, sink.clone(), fast_config(2)));

        let started = scheduler.start("pool-1").await.unwrap();
        assert_eq!(started, 2);
        assert_eq!(scheduler.status().active_workers, 2);

        let done = {
            let scheduler = scheduler.clone();
            wait_until(Duration::from_secs(5), move || {
                let agg = scheduler.stream_progress("pool-1");
                agg.workers.len() == 2 && agg.percent_complete >= 100.0
            })
            .await
        };
        assert!(done, "stream should drain within the deadline");

        // Every block divisible by 100 in (0, 5000] yields one record
        assert_eq!(sink.record_count(), 50);
        scheduler.stop("pool-1");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sink = Arc::new(MockSink::new());
        let scheduler = scheduler_with(MockSource::new(10_000), sink, fast_config(2));

        assert_eq!(scheduler.stop("pool-1"), StopStatus::NotRunning);

        scheduler.start("pool-1").await.unwrap();
        assert_eq!(scheduler.stop("pool-1"), StopStatus::Stopped);
        assert_eq!(scheduler.stop("pool-1"), StopStatus::NotRunning);
        assert_eq!(scheduler.stop_worker("pool-1", 0), StopStatus::NotRunning);
        assert_eq!(scheduler.status().active_workers, 0);
    }

    #[tokio::test]
    async fn stop_single_worker() {
        let sink = Arc::new(MockSink::new());
        let scheduler = scheduler_with(MockSource::new(10_000), sink, fast_config(3));

        scheduler.start("pool-1").await.unwrap();
        assert_eq!(scheduler.stop_worker("pool-1", 1), StopStatus::Stopped);
        assert_eq!(scheduler.status().active_workers, 2);
        assert_eq!(scheduler.stop_worker("pool-1", 1), StopStatus::NotRunning);
        scheduler.stop("pool-1");
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let sink = Arc::new(MockSink::new());
        let scheduler = scheduler_with(MockSource::new(10_000), sink, fast_config(2));

        scheduler.start("pool-1").await.unwrap();
        assert!(scheduler.start("pool-1").await.is_err());
        scheduler.stop("pool-1");
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_one_worker_set() {
        let sink = Arc::new(MockSink::new());
        // Slow chain head keeps both calls in flight at the same time
        let source = MockSource::new(10_000).delay_ms(100);
        let scheduler = Arc::new(scheduler_with(source, sink, fast_config(2)));

        let a = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start("pool-1").await })
        };
        let b = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start("pool-1").await })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one concurrent start may win");
        assert_eq!(scheduler.status().active_workers, 2);
        scheduler.stop("pool-1");
    }

    #[tokio::test]
    async fn failsafe_reduces_worker_count() {
        let sink = Arc::new(MockSink::new());
        // 6 head failures: 3 at count 3 → reduce to 2, 3 more → reduce to 1
        let source = MockSource::new(10_000).fail_head_times(6);
        let scheduler = scheduler_with(source, sink, fast_config(3));

        let started = scheduler.start("pool-1").await.unwrap();
        assert_eq!(started, 1, "failsafe should land on the floor");
        assert_eq!(scheduler.status().active_workers, 1);
        scheduler.stop("pool-1");
    }

    #[tokio::test]
    async fn failsafe_errors_out_at_floor() {
        let sink = Arc::new(MockSink::new());
        let source = MockSource::new(10_000).fail_head();
        let scheduler = scheduler_with(source, sink, fast_config(1));

        assert!(scheduler.start("pool-1").await.is_err());
        assert_eq!(scheduler.status().active_workers, 0);
    }

    #[tokio::test]
    async fn resume_keeps_existing_checkpoints() {
        let sink = Arc::new(MockSink::new());
        let store = Arc::new(MemoryCheckpointStore::new());

        // Prior run left worker 0 mid-range
        let mut cp0 = WorkerCheckpoint::new("pool-1", 0, 0, Some(5_000));
        cp0.last_indexed_block = 3_000;
        cp0.status = WorkerStatus::Running;
        store.save(cp0).await.unwrap();
        store.save(WorkerCheckpoint::new("pool-1", 1, 5_000, None)).await.unwrap();

        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(MockSource::new(10_000)),
            sink,
            SourceFilter::default(),
            fast_config(2),
        );
        scheduler.start("pool-1").await.unwrap();
        scheduler.stop("pool-1");

        let cp = store.load("pool-1", 0).await.unwrap().unwrap();
        assert!(cp.last_indexed_block >= 3_000, "resume must not reset progress");
    }

    #[tokio::test]
    async fn completed_worker_steals_from_stalled_sibling() {
        let sink = Arc::new(MockSink::new());
        let store = Arc::new(MemoryCheckpointStore::new());

        // Worker 0 is one batch from done; worker 1 has ~1M blocks left
        let mut cp0 = WorkerCheckpoint::new("pool-1", 0, 0, Some(1_000_000));
        cp0.last_indexed_block = 999_500;
        cp0.status = WorkerStatus::Running;
        store.save(cp0).await.unwrap();
        let mut cp1 = WorkerCheckpoint::new("pool-1", 1, 1_000_000, None);
        cp1.status = WorkerStatus::Running;
        store.save(cp1).await.unwrap();

        let config = fast_config(2).min_steal_blocks(100_000);
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            Arc::new(MockSource::new(2_000_000)),
            sink,
            SourceFilter::default(),
            config,
        ));
        scheduler.start("pool-1").await.unwrap();

        let mut stolen = false;
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(cp) = store.load("pool-1", 0).await.unwrap() {
                if cp.range_start >= 1_000_000 {
                    stolen = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stolen, "finished worker should be reassigned into the open range");

        let donor = store.load("pool-1", 1).await.unwrap().unwrap();
        assert!(donor.range_end.is_some(), "donor range must be bounded after the steal");
        scheduler.stop("pool-1");
    }
}
