//! Work-stealing coordinator — rebalances ranges between workers.
//!
//! When a worker drains its range while siblings still have work, it steals
//! half of the *remaining* (unprocessed) blocks of the sibling with the most
//! left. The donor's `range_end` shrinks; the thief is reassigned to the
//! stolen half and resumes on its next tick.
//!
//! A short-lived reservation per donor prevents two thieves from splitting
//! the same range. There is no rollback: a crash mid-steal leaves the donor
//! short-ranged and the thief idle until the reservation expires, after which
//! both simply resume from their persisted checkpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, WorkerCheckpoint, WorkerStatus};
use crate::error::ScanError;
use crate::progress::ProgressRegistry;

/// A planned split of a donor's remaining range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealPlan {
    pub stream: String,
    pub donor_worker: u32,
    pub thief_worker: u32,
    /// The donor's target before the split; becomes the thief's `range_end`.
    pub donor_target: u64,
    /// Blocks reassigned to the thief.
    pub stolen_blocks: u64,
    /// The donor's new `range_end`; also the thief's new `range_start`.
    pub donor_new_end: u64,
}

/// Coordinates steals for one scheduler process.
pub struct StealCoordinator {
    store: Arc<dyn CheckpointStore>,
    progress: Arc<ProgressRegistry>,
    /// Active donor reservations: `(stream, donor)` → reservation time.
    reservations: Mutex<HashMap<(String, u32), Instant>>,
    min_steal_blocks: u64,
    reservation_ttl: Duration,
}

impl StealCoordinator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        progress: Arc<ProgressRegistry>,
        min_steal_blocks: u64,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            progress,
            reservations: Mutex::new(HashMap::new()),
            min_steal_blocks,
            reservation_ttl,
        }
    }

    /// Pick a donor for `thief_worker` and reserve it.
    ///
    /// Candidates are running siblings; the one with the most remaining
    /// blocks wins, ties broken by lowest worker id. Returns `None` when no
    /// sibling clears the `2 × min_steal_blocks` floor.
    pub fn find_donor(&self, stream: &str, thief_worker: u32) -> Option<StealPlan> {
        let mut best: Option<(u64, u32, u64)> = None; // (remaining, donor, target)
        for p in self.progress.stream_workers(stream) {
            if p.worker_id == thief_worker || p.completed_at.is_some() {
                continue;
            }
            let remaining = p.remaining_blocks();
            if remaining <= 2 * self.min_steal_blocks {
                continue;
            }
            if self.is_reserved(stream, p.worker_id) {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_remaining, best_worker, _)) => {
                    remaining > best_remaining
                        || (remaining == best_remaining && p.worker_id < best_worker)
                }
            };
            if better {
                best = Some((remaining, p.worker_id, p.target_block));
            }
        }

        let (remaining, donor_worker, donor_target) = best?;
        if !self.reserve(stream, donor_worker) {
            return None;
        }

        let stolen_blocks = remaining / 2;
        if stolen_blocks < self.min_steal_blocks {
            self.release(stream, donor_worker);
            return None;
        }

        Some(StealPlan {
            stream: stream.to_string(),
            donor_worker,
            thief_worker,
            donor_target,
            stolen_blocks,
            donor_new_end: donor_target - stolen_blocks,
        })
    }

    /// Apply a reserved plan: shrink the donor, reassign the thief.
    ///
    /// The reservation is released on success only; on failure it is left to
    /// expire, which is the sole recovery path.
    pub async fn apply_steal(&self, plan: &StealPlan) -> Result<(), ScanError> {
        match self.apply_inner(plan).await {
            Ok(()) => {
                self.release(&plan.stream, plan.donor_worker);
                info!(
                    stream = %plan.stream,
                    donor = plan.donor_worker,
                    thief = plan.thief_worker,
                    stolen = plan.stolen_blocks,
                    donor_new_end = plan.donor_new_end,
                    "steal applied"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    stream = %plan.stream,
                    donor = plan.donor_worker,
                    thief = plan.thief_worker,
                    %err,
                    "steal failed, reservation left to expire"
                );
                Err(err)
            }
        }
    }

    /// Convenience for the scheduler: find a donor and apply in one call.
    /// Returns the applied plan, or `None` when nothing was stealable.
    pub async fn try_steal(&self, stream: &str, thief_worker: u32) -> Option<StealPlan> {
        let plan = self.find_donor(stream, thief_worker)?;
        match self.apply_steal(&plan).await {
            Ok(()) => Some(plan),
            Err(_) => None,
        }
    }

    async fn apply_inner(&self, plan: &StealPlan) -> Result<(), ScanError> {
        let mut donor = self
            .store
            .load(&plan.stream, plan.donor_worker)
            .await?
            .ok_or_else(|| ScanError::Other(format!("donor {} has no checkpoint", plan.donor_worker)))?;
        donor.range_end = Some(plan.donor_new_end);
        donor.updated_at = Utc::now();
        self.store.save(donor.clone()).await?;
        self.progress.update_from_checkpoint(&donor, plan.donor_new_end);

        let mut thief = match self.store.load(&plan.stream, plan.thief_worker).await? {
            Some(thief) => thief,
            None => WorkerCheckpoint::new(&plan.stream, plan.thief_worker, plan.donor_new_end, None),
        };
        thief.range_start = plan.donor_new_end;
        thief.range_end = Some(plan.donor_target);
        thief.last_indexed_block = plan.donor_new_end;
        thief.status = WorkerStatus::Idle;
        thief.last_error = None;
        thief.updated_at = Utc::now();
        self.store.save(thief.clone()).await?;
        self.progress.update_from_checkpoint(&thief, plan.donor_target);

        Ok(())
    }

    fn is_reserved(&self, stream: &str, donor: u32) -> bool {
        let reservations = self.reservations.lock().unwrap();
        match reservations.get(&(stream.to_string(), donor)) {
            Some(at) => at.elapsed() < self.reservation_ttl,
            None => false,
        }
    }

    /// Reserve `donor`; an expired reservation is overwritten.
    fn reserve(&self, stream: &str, donor: u32) -> bool {
        let mut reservations = self.reservations.lock().unwrap();
        let key = (stream.to_string(), donor);
        if let Some(at) = reservations.get(&key) {
            if at.elapsed() < self.reservation_ttl {
                return false;
            }
        }
        reservations.insert(key, Instant::now());
        true
    }

    fn release(&self, stream: &str, donor: u32) {
        self.reservations
            .lock()
            .unwrap()
            .remove(&(stream.to_string(), donor));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;

    const MIN_STEAL: u64 = 50_000;

    fn coordinator(ttl: Duration) -> StealCoordinator {
        StealCoordinator::new(
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(ProgressRegistry::new()),
            MIN_STEAL,
            ttl,
        )
    }

    /// Register a worker in progress + store at `current` of `[start, end)`.
    async fn seed_worker(c: &StealCoordinator, worker: u32, start: u64, end: u64, current: u64) {
        let mut cp = WorkerCheckpoint::new("pool-1", worker, start, Some(end));
        cp.last_indexed_block = current;
        cp.status = WorkerStatus::Running;
        c.store.save(cp.clone()).await.unwrap();
        c.progress.update_from_checkpoint(&cp, end);
    }

    #[tokio::test]
    async fn steal_scenario_splits_remaining_in_half() {
        let c = coordinator(Duration::from_secs(60));
        // Worker 0 stalled at 10,000 of [0, 250,000): 240,000 remaining
        seed_worker(&c, 0, 0, 250_000, 10_000).await;

        let plan = c.find_donor("pool-1", 3).expect("donor expected");
        assert_eq!(plan.donor_worker, 0);
        assert_eq!(plan.stolen_blocks, 120_000);
        assert_eq!(plan.donor_new_end, 130_000);
        assert_eq!(plan.donor_target, 250_000);

        c.apply_steal(&plan).await.unwrap();

        let donor = c.store.load("pool-1", 0).await.unwrap().unwrap();
        assert_eq!(donor.range_end, Some(130_000));
        assert_eq!(donor.last_indexed_block, 10_000, "donor position untouched");

        let thief = c.store.load("pool-1", 3).await.unwrap().unwrap();
        assert_eq!(thief.range_start, 130_000);
        assert_eq!(thief.range_end, Some(250_000));
        assert_eq!(thief.last_indexed_block, 130_000);
        assert_eq!(thief.status, WorkerStatus::Idle);
    }

    /// No blocks are created or lost by the split.
    #[tokio::test]
    async fn steal_conserves_blocks() {
        let c = coordinator(Duration::from_secs(60));
        seed_worker(&c, 1, 250_000, 500_000, 260_000).await;

        let plan = c.find_donor("pool-1", 2).unwrap();
        c.apply_steal(&plan).await.unwrap();

        let donor = c.store.load("pool-1", 1).await.unwrap().unwrap();
        let thief = c.store.load("pool-1", 2).await.unwrap().unwrap();

        let thief_span = thief.range_end.unwrap() - thief.range_start;
        assert_eq!(donor.range_end.unwrap() + thief_span, 500_000);
        assert!(thief.range_start < thief.range_end.unwrap());
        assert!(thief.range_end.unwrap() <= 500_000);
    }

    /// No steal happens when remaining ≤ 2 × the minimum steal size.
    #[tokio::test]
    async fn no_steal_below_floor() {
        let c = coordinator(Duration::from_secs(60));
        // Exactly 2 × MIN_STEAL remaining is still ineligible
        seed_worker(&c, 0, 0, 100_000, 0).await;
        assert!(c.find_donor("pool-1", 1).is_none());

        // One block over the floor is eligible
        seed_worker(&c, 2, 0, 100_001, 0).await;
        let plan = c.find_donor("pool-1", 1).unwrap();
        assert_eq!(plan.donor_worker, 2);
        assert_eq!(plan.stolen_blocks, 50_000);
    }

    #[tokio::test]
    async fn largest_remaining_wins_ties_to_lowest_id() {
        let c = coordinator(Duration::from_secs(60));
        seed_worker(&c, 0, 0, 200_000, 0).await; // 200k remaining
        seed_worker(&c, 1, 0, 300_000, 0).await; // 300k remaining
        seed_worker(&c, 2, 0, 300_000, 0).await; // 300k remaining (tie)

        let plan = c.find_donor("pool-1", 5).unwrap();
        assert_eq!(plan.donor_worker, 1, "tie goes to the lowest worker id");
    }

    #[tokio::test]
    async fn thief_and_completed_workers_are_not_donors() {
        let c = coordinator(Duration::from_secs(60));
        seed_worker(&c, 0, 0, 500_000, 0).await;

        // The thief itself is never a donor
        assert!(c.find_donor("pool-1", 0).is_none());

        // A completed worker is never a donor
        let mut cp = c.store.load("pool-1", 0).await.unwrap().unwrap();
        cp.last_indexed_block = 500_000;
        c.progress.update_from_checkpoint(&cp, 500_000);
        assert!(c.find_donor("pool-1", 1).is_none());
    }

    #[tokio::test]
    async fn reservation_blocks_second_thief() {
        let c = coordinator(Duration::from_secs(60));
        seed_worker(&c, 0, 0, 500_000, 0).await;

        let plan = c.find_donor("pool-1", 1).expect("first thief reserves");
        assert!(c.find_donor("pool-1", 2).is_none(), "donor is reserved");

        c.apply_steal(&plan).await.unwrap();
        // Released after a completed steal; remaining shrank accordingly
        let plan2 = c.find_donor("pool-1", 2);
        assert!(plan2.is_some(), "donor can be stolen from again once released");
    }

    #[tokio::test]
    async fn expired_reservation_is_ignored() {
        let c = coordinator(Duration::from_millis(0));
        seed_worker(&c, 0, 0, 500_000, 0).await;

        let _ = c.find_donor("pool-1", 1).expect("reserves");
        // TTL of zero: the reservation is immediately stale
        assert!(c.find_donor("pool-1", 2).is_some());
    }

    #[tokio::test]
    async fn try_steal_returns_applied_plan() {
        let c = coordinator(Duration::from_secs(60));
        seed_worker(&c, 0, 0, 250_000, 10_000).await;

        let plan = c.try_steal("pool-1", 3).await.unwrap();
        assert_eq!(plan.donor_new_end, 130_000);
        assert!(c.store.load("pool-1", 3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn no_candidates_yields_none() {
        let c = coordinator(Duration::from_secs(60));
        assert!(c.find_donor("pool-1", 0).is_none());
        assert!(c.try_steal("pool-1", 0).await.is_none());
    }
}
