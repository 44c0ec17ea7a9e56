//! rangescan-core — checkpointed, partitioned, work-stealing block-range scanner.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (one task per worker, phase-offset ticks)
//!     └── Scanner            (one bounded batch per tick)
//!             ├── CheckpointStore  (durable per-worker position, crash recovery)
//!             ├── EventSource      (chain head + log fetches, sub-chunked)
//!             ├── RecordSink       (idempotent upserts, explicit DuplicateKey)
//!             ├── ProgressRegistry (ephemeral per-worker progress, never authoritative)
//!             └── StealCoordinator (splits a slow worker's remaining range)
//! ```
//!
//! The block domain is partitioned into contiguous per-worker ranges; each
//! worker advances its own checkpoint strictly forward. A worker that drains
//! its range steals half of the largest remaining sibling range, so the whole
//! domain finishes without idle workers.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod partition;
pub mod progress;
pub mod scanner;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod steal;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use checkpoint::{CheckpointStore, CoverageGap, MemoryCheckpointStore, WorkerCheckpoint, WorkerStatus};
pub use config::ScanConfig;
pub use error::ScanError;
pub use partition::{partition, BlockRange};
pub use progress::{AggregatedProgress, LiveProgress, ProgressRegistry};
pub use scanner::{BatchOutcome, BatchStatus, Scanner};
pub use scheduler::{Scheduler, SchedulerStatus, StopStatus};
pub use sink::{RecordSink, SinkError};
pub use source::{EventSource, RawEvent, SourceFilter};
pub use steal::{StealCoordinator, StealPlan};
pub use types::{RecordKey, RecordPayload, ScanRecord};
