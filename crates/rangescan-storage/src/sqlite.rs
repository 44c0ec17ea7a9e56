//! SQLite storage backend for Rangescan.
//!
//! Persists checkpoints, records, and coverage gaps to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use rangescan_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./scan.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use rangescan_core::checkpoint::{CheckpointStore, CoverageGap, WorkerCheckpoint, WorkerStatus};
use rangescan_core::error::ScanError;
use rangescan_core::sink::{RecordSink, SinkError};
use rangescan_core::types::{RecordKey, RecordPayload, ScanRecord};

/// SQLite-backed storage for checkpoints, records, and coverage gaps.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./scan.db"`) or a full SQLite
    /// URL (`"sqlite:./scan.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ScanError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, ScanError> {
        // One connection only: each pooled connection would otherwise get its
        // own private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ScanError> {
        // WAL mode — better concurrent read throughput
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        // Checkpoint table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                stream               TEXT    NOT NULL,
                worker_id            INTEGER NOT NULL,
                range_start          INTEGER NOT NULL,
                range_end            INTEGER,
                last_indexed_block   INTEGER NOT NULL,
                status               TEXT    NOT NULL,
                total_events_indexed INTEGER NOT NULL,
                total_entities_found INTEGER NOT NULL,
                last_error           TEXT,
                updated_at           INTEGER NOT NULL,
                PRIMARY KEY (stream, worker_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        // Records table — natural key enforces sink idempotency
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                stream       TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                payload      TEXT    NOT NULL,
                UNIQUE (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        // Coverage-gap table — skipped chunks awaiting backfill
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS coverage_gaps (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                stream      TEXT    NOT NULL,
                worker_id   INTEGER NOT NULL,
                from_block  INTEGER NOT NULL,
                to_block    INTEGER NOT NULL,
                reason      TEXT    NOT NULL,
                recorded_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        // Indexes for common query patterns
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_stream_block
             ON records (stream, block_number);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_gaps_stream ON coverage_gaps (stream);",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        Ok(())
    }

    // ─── Record queries ─────────────────────────────────────────────────────────

    /// All persisted records for a stream, ordered by block + log index.
    pub async fn records_by_stream(&self, stream: &str) -> Result<Vec<ScanRecord>, ScanError> {
        let rows = sqlx::query(
            "SELECT stream, block_number, tx_hash, log_index, payload
             FROM records WHERE stream = ? ORDER BY block_number, log_index",
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload_str: String = row.get("payload");
            let payload: RecordPayload = serde_json::from_str(&payload_str)
                .map_err(|e| ScanError::Storage(format!("bad record payload: {e}")))?;
            records.push(ScanRecord {
                stream: row.get("stream"),
                block_number: row.get::<i64, _>("block_number") as u64,
                key: RecordKey::new(
                    row.get::<String, _>("tx_hash"),
                    row.get::<i64, _>("log_index") as u32,
                ),
                payload,
            });
        }
        Ok(records)
    }

    /// Total number of persisted records across all streams.
    pub async fn record_count(&self) -> Result<u64, ScanError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM records")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    // ─── Stream reset ───────────────────────────────────────────────────────────

    /// Destructive reset: delete all checkpoints, records, and gaps of
    /// `stream`. The only way checkpoints are ever deleted in bulk.
    pub async fn reset_stream(&self, stream: &str) -> Result<(), ScanError> {
        sqlx::query("DELETE FROM checkpoints WHERE stream = ?")
            .bind(stream)
            .execute(&self.pool)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM records WHERE stream = ?")
            .bind(stream)
            .execute(&self.pool)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        sqlx::query("DELETE FROM coverage_gaps WHERE stream = ?")
            .bind(stream)
            .execute(&self.pool)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        debug!(stream, "stream reset");
        Ok(())
    }
}

fn status_to_str(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Idle => "idle",
        WorkerStatus::Running => "running",
        WorkerStatus::Complete => "complete",
        WorkerStatus::Error => "error",
    }
}

fn status_from_str(s: &str) -> Result<WorkerStatus, ScanError> {
    match s {
        "idle" => Ok(WorkerStatus::Idle),
        "running" => Ok(WorkerStatus::Running),
        "complete" => Ok(WorkerStatus::Complete),
        "error" => Ok(WorkerStatus::Error),
        other => Err(ScanError::Storage(format!("unknown worker status '{other}'"))),
    }
}

fn timestamp(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default()
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, stream: &str, worker_id: u32) -> Result<Option<WorkerCheckpoint>, ScanError> {
        let row = sqlx::query(
            "SELECT stream, worker_id, range_start, range_end, last_indexed_block,
                    status, total_events_indexed, total_entities_found, last_error, updated_at
             FROM checkpoints WHERE stream = ? AND worker_id = ?",
        )
        .bind(stream)
        .bind(worker_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        row.map(checkpoint_from_row).transpose()
    }

    async fn save(&self, checkpoint: WorkerCheckpoint) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (stream, worker_id, range_start, range_end, last_indexed_block,
              status, total_events_indexed, total_entities_found, last_error, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&checkpoint.stream)
        .bind(checkpoint.worker_id as i64)
        .bind(checkpoint.range_start as i64)
        .bind(checkpoint.range_end.map(|b| b as i64))
        .bind(checkpoint.last_indexed_block as i64)
        .bind(status_to_str(checkpoint.status))
        .bind(checkpoint.total_events_indexed as i64)
        .bind(checkpoint.total_entities_found as i64)
        .bind(&checkpoint.last_error)
        .bind(timestamp(checkpoint.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        debug!(
            stream = %checkpoint.stream,
            worker = checkpoint.worker_id,
            block = checkpoint.last_indexed_block,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, stream: &str, worker_id: u32) -> Result<(), ScanError> {
        sqlx::query("DELETE FROM checkpoints WHERE stream = ? AND worker_id = ?")
            .bind(stream)
            .bind(worker_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| ScanError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, stream: &str) -> Result<Vec<WorkerCheckpoint>, ScanError> {
        let rows = sqlx::query(
            "SELECT stream, worker_id, range_start, range_end, last_indexed_block,
                    status, total_events_indexed, total_entities_found, last_error, updated_at
             FROM checkpoints WHERE stream = ? ORDER BY worker_id",
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        rows.into_iter().map(checkpoint_from_row).collect()
    }

    async fn record_gap(&self, gap: CoverageGap) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT INTO coverage_gaps (stream, worker_id, from_block, to_block, reason, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&gap.stream)
        .bind(gap.worker_id as i64)
        .bind(gap.from_block as i64)
        .bind(gap.to_block as i64)
        .bind(&gap.reason)
        .bind(timestamp(gap.recorded_at))
        .execute(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn gaps(&self, stream: &str) -> Result<Vec<CoverageGap>, ScanError> {
        let rows = sqlx::query(
            "SELECT stream, worker_id, from_block, to_block, reason, recorded_at
             FROM coverage_gaps WHERE stream = ? ORDER BY from_block",
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ScanError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| CoverageGap {
                stream: row.get("stream"),
                worker_id: row.get::<i64, _>("worker_id") as u32,
                from_block: row.get::<i64, _>("from_block") as u64,
                to_block: row.get::<i64, _>("to_block") as u64,
                reason: row.get("reason"),
                recorded_at: from_timestamp(row.get("recorded_at")),
            })
            .collect())
    }
}

fn checkpoint_from_row(row: sqlx::sqlite::SqliteRow) -> Result<WorkerCheckpoint, ScanError> {
    Ok(WorkerCheckpoint {
        stream: row.get("stream"),
        worker_id: row.get::<i64, _>("worker_id") as u32,
        range_start: row.get::<i64, _>("range_start") as u64,
        range_end: row.get::<Option<i64>, _>("range_end").map(|b| b as u64),
        last_indexed_block: row.get::<i64, _>("last_indexed_block") as u64,
        status: status_from_str(row.get::<String, _>("status").as_str())?,
        total_events_indexed: row.get::<i64, _>("total_events_indexed") as u64,
        total_entities_found: row.get::<i64, _>("total_entities_found") as u64,
        last_error: row.get("last_error"),
        updated_at: from_timestamp(row.get("updated_at")),
    })
}

// ─── RecordSink impl ─────────────────────────────────────────────────────────

#[async_trait]
impl RecordSink for SqliteStorage {
    async fn upsert(&self, record: ScanRecord) -> Result<(), SinkError> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| SinkError::Storage(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO records (stream, block_number, tx_hash, log_index, payload)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.stream)
        .bind(record.block_number as i64)
        .bind(&record.key.tx_hash)
        .bind(record.key.log_index as i64)
        .bind(&payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e
                .as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false) =>
            {
                Err(SinkError::DuplicateKey)
            }
            Err(e) => Err(SinkError::Storage(e.to_string())),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
