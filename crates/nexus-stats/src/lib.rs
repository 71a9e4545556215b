//! # nexus-stats
//!
//! Statistics collection for the miner: global session counters plus
//! per-worker search counters, pulled from workers on a timer and rendered
//! to the log at the configured interval.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global session counters. Deltas are folded in; readers get a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStats {
    /// Blocks accepted by the node.
    pub accepted_blocks: u64,
    /// Blocks rejected by the node.
    pub rejected_blocks: u64,
    /// Connection retry attempts.
    pub connection_retries: u64,
}

/// Per-worker hash-search counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashStats {
    /// Nonces hashed since the current block was set.
    pub hash_count: u64,
    /// Best leading-zero count observed.
    pub best_leading_zeros: u32,
    /// Candidates that met the difficulty target.
    pub met_difficulty_count: u64,
}

/// Statistics collector shared between the session loop, the workers and
/// the render timer.
pub struct Collector {
    start_time: Instant,
    accepted_blocks: AtomicU64,
    rejected_blocks: AtomicU64,
    connection_retries: AtomicU64,
    workers: Mutex<Vec<HashStats>>,
}

impl Collector {
    /// Create a collector with one slot per configured worker.
    pub fn new(worker_count: usize) -> Self {
        Self {
            start_time: Instant::now(),
            accepted_blocks: AtomicU64::new(0),
            rejected_blocks: AtomicU64::new(0),
            connection_retries: AtomicU64::new(0),
            workers: Mutex::new(vec![HashStats::default(); worker_count]),
        }
    }

    /// Record an accepted block.
    pub fn block_accepted(&self) {
        self.accepted_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected block.
    pub fn block_rejected(&self) {
        self.rejected_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection retry.
    pub fn connection_retry(&self) {
        self.connection_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace a worker's counters with its latest snapshot.
    pub fn update_worker_stats(&self, worker_id: usize, stats: HashStats) {
        let mut workers = self.workers.lock();
        if let Some(slot) = workers.get_mut(worker_id) {
            *slot = stats;
        }
    }

    /// Snapshot the global counters.
    pub fn global(&self) -> GlobalStats {
        GlobalStats {
            accepted_blocks: self.accepted_blocks.load(Ordering::Relaxed),
            rejected_blocks: self.rejected_blocks.load(Ordering::Relaxed),
            connection_retries: self.connection_retries.load(Ordering::Relaxed),
        }
    }

    /// Snapshot the per-worker counters.
    pub fn workers(&self) -> Vec<HashStats> {
        self.workers.lock().clone()
    }

    /// Aggregate hash count across all workers.
    pub fn total_hash_count(&self) -> u64 {
        self.workers.lock().iter().map(|w| w.hash_count).sum()
    }

    /// Seconds since the collector was created.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render a summary to the log.
    pub fn log_summary(&self) {
        let global = self.global();
        let uptime = self.uptime_secs().max(1);
        let total_hashes = self.total_hash_count();
        info!(
            uptime_secs = uptime,
            accepted = global.accepted_blocks,
            rejected = global.rejected_blocks,
            retries = global.connection_retries,
            hash_rate = total_hashes / uptime,
            "Mining summary"
        );
        for (id, worker) in self.workers.lock().iter().enumerate() {
            info!(
                worker = id,
                hash_count = worker.hash_count,
                best_leading_zeros = worker.best_leading_zeros,
                met_difficulty = worker.met_difficulty_count,
                "Worker stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_counters() {
        let collector = Collector::new(2);
        collector.block_accepted();
        collector.block_accepted();
        collector.block_rejected();
        collector.connection_retry();

        let global = collector.global();
        assert_eq!(global.accepted_blocks, 2);
        assert_eq!(global.rejected_blocks, 1);
        assert_eq!(global.connection_retries, 1);
    }

    #[test]
    fn test_worker_snapshots() {
        let collector = Collector::new(2);
        collector.update_worker_stats(
            1,
            HashStats {
                hash_count: 500,
                best_leading_zeros: 12,
                met_difficulty_count: 1,
            },
        );

        let workers = collector.workers();
        assert_eq!(workers[0], HashStats::default());
        assert_eq!(workers[1].hash_count, 500);
        assert_eq!(collector.total_hash_count(), 500);
    }

    #[test]
    fn test_out_of_range_worker_ignored() {
        let collector = Collector::new(1);
        collector.update_worker_stats(9, HashStats { hash_count: 7, ..Default::default() });
        assert_eq!(collector.total_hash_count(), 0);
    }
}
