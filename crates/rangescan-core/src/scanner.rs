//! Batch scanner — consumes one bounded batch of a worker's range per call.
//!
//! Each invocation:
//! 1. Rejects re-entrancy per worker identity (no queueing).
//! 2. Loads (or lazily creates) the checkpoint and resolves the target.
//! 3. Fetches `(last_indexed, batch_end]` in chunks; a failed chunk is
//!    logged, recorded in the durable gap list, and skipped.
//! 4. Upserts every record; duplicate keys are swallowed.
//! 5. Advances the checkpoint only after all chunks were attempted.
//!
//! A crash therefore re-processes at most one batch, and the sink's
//! natural-key dedup makes the replay invisible.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::checkpoint::{indexer_name, CheckpointStore, CoverageGap, WorkerCheckpoint, WorkerStatus};
use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::progress::ProgressRegistry;
use crate::sink::RecordSink;
use crate::source::{chunk_spans, EventSource, RawEvent, SourceFilter};
use crate::types::{RecordKey, RecordPayload, ScanRecord};

/// Result status of one batch invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Another batch for the same worker is still in flight.
    AlreadyRunning,
    /// Blocks were consumed; more remain.
    Running,
    /// The worker's range is drained up to its target.
    Complete,
    /// The batch failed; position unchanged, retried next tick.
    Error,
}

/// Outcome of one `run_batch` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub events_found: u64,
    pub blocks_indexed: u64,
    pub current_block: u64,
    pub target_block: u64,
}

impl BatchOutcome {
    fn already_running() -> Self {
        Self {
            status: BatchStatus::AlreadyRunning,
            events_found: 0,
            blocks_indexed: 0,
            current_block: 0,
            target_block: 0,
        }
    }

    fn failed() -> Self {
        Self {
            status: BatchStatus::Error,
            events_found: 0,
            blocks_indexed: 0,
            current_block: 0,
            target_block: 0,
        }
    }
}

/// The batch scanner. Shared by every worker task of a scheduler.
pub struct Scanner {
    store: Arc<dyn CheckpointStore>,
    source: Arc<dyn EventSource>,
    sink: Arc<dyn RecordSink>,
    progress: Arc<ProgressRegistry>,
    filter: SourceFilter,
    config: ScanConfig,
    /// Re-entrancy guard: worker identities with a batch in flight.
    running: Mutex<HashSet<String>>,
}

impl Scanner {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn RecordSink>,
        progress: Arc<ProgressRegistry>,
        filter: SourceFilter,
        config: ScanConfig,
    ) -> Self {
        Self {
            store,
            source,
            sink,
            progress,
            filter,
            config,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run one batch for `(stream, worker_id)`.
    ///
    /// Never returns `Err` and never panics: failures surface as a
    /// `BatchStatus::Error` outcome with `last_error` persisted, so the
    /// scheduler loop cannot be taken down by a bad batch.
    pub async fn run_batch(&self, stream: &str, worker_id: u32) -> BatchOutcome {
        let name = indexer_name(stream, worker_id);
        if !self.running.lock().unwrap().insert(name.clone()) {
            return BatchOutcome::already_running();
        }

        let outcome = match self.run_batch_inner(stream, worker_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(stream, worker = worker_id, %err, "batch failed");
                self.mark_error(stream, worker_id, &err).await;
                BatchOutcome::failed()
            }
        };

        self.running.lock().unwrap().remove(&name);
        outcome
    }

    async fn run_batch_inner(&self, stream: &str, worker_id: u32) -> Result<BatchOutcome, ScanError> {
        let mut cp = match self.store.load(stream, worker_id).await? {
            Some(cp) => cp,
            // Lazily created workers own the whole domain until partitioned.
            None => WorkerCheckpoint::new(stream, worker_id, self.config.genesis_block, None),
        };

        let head = self.source.chain_head().await?;
        let target = cp.target_block(head);

        if cp.last_indexed_block >= target {
            if cp.status != WorkerStatus::Complete {
                cp.status = WorkerStatus::Complete;
                cp.last_error = None;
                cp.updated_at = Utc::now();
                self.store.save(cp.clone()).await?;
            }
            self.progress.update_from_checkpoint(&cp, target);
            return Ok(BatchOutcome {
                status: BatchStatus::Complete,
                events_found: 0,
                blocks_indexed: 0,
                current_block: cp.last_indexed_block,
                target_block: target,
            });
        }

        let from = cp.last_indexed_block + 1;
        let batch_end = (cp.last_indexed_block + self.config.batch_size).min(target);

        let mut events_found = 0u64;
        let mut entities_found = 0u64;

        for (i, (chunk_from, chunk_to)) in chunk_spans(from, batch_end, self.config.chunk_size)
            .into_iter()
            .enumerate()
        {
            if i > 0 && self.config.chunk_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.chunk_delay_ms)).await;
            }

            let events = match self.source.events(&self.filter, chunk_from, chunk_to).await {
                Ok(events) => events,
                Err(err) => {
                    warn!(
                        stream,
                        worker = worker_id,
                        chunk_from,
                        chunk_to,
                        %err,
                        "chunk fetch failed, skipping and recording gap"
                    );
                    self.store
                        .record_gap(CoverageGap {
                            stream: stream.to_string(),
                            worker_id,
                            from_block: chunk_from,
                            to_block: chunk_to,
                            reason: err.to_string(),
                            recorded_at: Utc::now(),
                        })
                        .await?;
                    continue;
                }
            };

            for event in events {
                events_found += 1;
                let record = record_from_event(stream, event);
                match self.sink.upsert(record).await {
                    Ok(()) => entities_found += 1,
                    // Expected when a range is re-scanned after a crash.
                    Err(err) if err.is_duplicate() => {}
                    Err(err) => {
                        warn!(stream, worker = worker_id, %err, "record upsert failed, skipping");
                    }
                }
            }
        }

        // Checkpoint advance happens only after every chunk was attempted;
        // this is the write that bounds crash re-processing to one batch.
        cp.last_indexed_block = batch_end;
        cp.total_events_indexed += events_found;
        cp.total_entities_found += entities_found;
        cp.status = if batch_end >= target {
            WorkerStatus::Complete
        } else {
            WorkerStatus::Running
        };
        cp.last_error = None;
        cp.updated_at = Utc::now();
        self.store.save(cp.clone()).await?;
        self.progress.update_from_checkpoint(&cp, target);

        info!(
            stream,
            worker = worker_id,
            from,
            to = batch_end,
            target,
            events = events_found,
            "batch complete"
        );

        Ok(BatchOutcome {
            status: cp.status.into_batch_status(),
            events_found,
            blocks_indexed: batch_end - from + 1,
            current_block: batch_end,
            target_block: target,
        })
    }

    /// Best-effort: persist the failure on the checkpoint so status queries
    /// surface it. The position is untouched; the next tick retries.
    async fn mark_error(&self, stream: &str, worker_id: u32, err: &ScanError) {
        let cp = match self.store.load(stream, worker_id).await {
            Ok(Some(mut cp)) => {
                cp.status = WorkerStatus::Error;
                cp.last_error = Some(err.to_string());
                cp.updated_at = Utc::now();
                cp
            }
            // A lazily-created worker may fail before its checkpoint ever
            // existed; persist one so status queries surface the failure.
            Ok(None) => {
                let mut cp = WorkerCheckpoint::new(stream, worker_id, self.config.genesis_block, None);
                cp.status = WorkerStatus::Error;
                cp.last_error = Some(err.to_string());
                cp
            }
            Err(store_err) => {
                error!(stream, worker = worker_id, %store_err, "could not load checkpoint to record error");
                return;
            }
        };
        if let Err(store_err) = self.store.save(cp).await {
            error!(stream, worker = worker_id, %store_err, "could not persist error status");
        }
    }
}

impl WorkerStatus {
    fn into_batch_status(self) -> BatchStatus {
        match self {
            WorkerStatus::Complete => BatchStatus::Complete,
            WorkerStatus::Error => BatchStatus::Error,
            _ => BatchStatus::Running,
        }
    }
}

fn record_from_event(stream: &str, event: RawEvent) -> ScanRecord {
    ScanRecord {
        stream: stream.to_string(),
        block_number: event.block_number,
        key: RecordKey::new(event.tx_hash, event.log_index),
        payload: RecordPayload::Event {
            address: event.address,
            topics: event.topics,
            data: event.data,
        },
    }
}
