//! rangescan-storage — pluggable storage backends for Rangescan.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Each backend implements both `CheckpointStore` (durable worker positions
//! and the coverage-gap list) and `RecordSink` (idempotent record upserts),
//! plus the destructive per-stream reset.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;
