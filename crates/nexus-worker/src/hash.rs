//! CPU hash-channel search engine.
//!
//! The inner hash is two-stage: Skein-1024 over the 92-byte header, then
//! Keccak over the Skein digest, compared as a 64-bit big-endian prefix.
//! The nonce sits at header offset 80, so a midstate over the first 80
//! bytes is reused for every candidate and only the nonce and timestamp
//! tail is re-absorbed.
//!
//! Candidates pass a cheap leading-zeros prefix mask before the full target
//! comparison, and the midstate-derived hash is cross-validated against a
//! from-scratch recomputation periodically and for every candidate; a
//! mismatch is never submitted.

use crate::{SolutionHandler, SolvedBlock, Worker, WorkerId};
use nexus_llp::BlockHeader;
use nexus_stats::{Collector, HashStats};
use parking_lot::Mutex;
use skein::consts::U128;
use skein::{Digest, Skein1024};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tiny_keccak::{Hasher as _, Keccak};
use tracing::{debug, error, info, trace};

type SkeinState = Skein1024<U128>;

/// Hashes between from-scratch cross-validations.
const CROSS_VALIDATE_INTERVAL: u64 = 100_000;

/// Hashes between counter flushes into the shared stats slot.
const COUNTER_FLUSH_INTERVAL: u64 = 4_096;

/// A hash-channel worker backed by one OS thread.
pub struct CpuHashWorker {
    id: WorkerId,
    stop: Arc<AtomicBool>,
    counters: Arc<Mutex<HashStats>>,
    handle: Option<JoinHandle<()>>,
}

impl CpuHashWorker {
    /// Create an idle worker. The search thread starts on the first
    /// `set_block`.
    pub fn new(id: WorkerId) -> Self {
        info!(worker = id, "CPU hash worker initialized");
        Self {
            id,
            stop: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Mutex::new(HashStats::default())),
            handle: None,
        }
    }

    /// Current counters, for tests and diagnostics.
    pub fn counters(&self) -> HashStats {
        *self.counters.lock()
    }

    fn stop_search(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Worker for CpuHashWorker {
    fn set_block(&mut self, header: BlockHeader, bits: u32, on_solution: SolutionHandler) {
        // Preempt any running search before reseeding.
        self.stop_search();

        // Pool mode may override the header's own target.
        let effective_bits = if bits != 0 { bits } else { header.bits };
        let target = crate::decode_bits(effective_bits);

        // Disjoint nonce sub-range per worker.
        let starting_nonce = (self.id as u64) << 48;

        *self.counters.lock() = HashStats::default();
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let counters = Arc::clone(&self.counters);
        let id = self.id;

        info!(
            worker = id,
            height = header.height,
            starting_nonce = format_args!("{:#018x}", starting_nonce),
            bits = format_args!("{:#010x}", effective_bits),
            "Starting hash search"
        );

        self.handle = Some(
            thread::Builder::new()
                .name(format!("hash-worker-{}", id))
                .spawn(move || {
                    search_loop(id, header, starting_nonce, target, stop, counters, on_solution);
                })
                .expect("failed to spawn hash worker thread"),
        );
    }

    fn update_statistics(&self, collector: &Collector) {
        collector.update_worker_stats(self.id as usize, *self.counters.lock());
    }
}

impl Drop for CpuHashWorker {
    fn drop(&mut self) {
        self.stop_search();
        debug!(worker = self.id, "CPU hash worker stopped");
    }
}

/// Compute the two-stage hash from the midstate for one nonce.
fn hash_from_midstate(midstate: &SkeinState, nonce: u64, time: u32) -> u64 {
    let mut skein = midstate.clone();
    Digest::update(&mut skein, nonce.to_be_bytes());
    Digest::update(&mut skein, time.to_be_bytes());
    keccak_fold(&skein.finalize())
}

/// Compute the two-stage hash from scratch over the full header.
fn hash_full(header: &BlockHeader, nonce: u64) -> u64 {
    let mut solved = header.clone();
    solved.nonce = nonce;
    let mut skein = SkeinState::new();
    Digest::update(&mut skein, solved.encode());
    keccak_fold(&skein.finalize())
}

/// Second stage: Keccak over the Skein digest, folded to a big-endian
/// 64-bit prefix for target comparison.
fn keccak_fold(skein_digest: &[u8]) -> u64 {
    let mut keccak = Keccak::v256();
    keccak.update(skein_digest);
    let mut out = [0u8; 32];
    keccak.finalize(&mut out);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&out[..8]);
    u64::from_be_bytes(prefix)
}

#[allow(clippy::too_many_arguments)]
fn search_loop(
    id: WorkerId,
    header: BlockHeader,
    starting_nonce: u64,
    target: crate::DifficultyTarget,
    stop: Arc<AtomicBool>,
    counters: Arc<Mutex<HashStats>>,
    on_solution: SolutionHandler,
) {
    // Midstate over the pre-nonce header prefix (offsets 0..80).
    let header_bytes = header.encode();
    let mut midstate = SkeinState::new();
    Digest::update(&mut midstate, &header_bytes[..80]);

    let mask = target.prefix_mask();
    let mut nonce = starting_nonce;
    let mut local = HashStats::default();
    let mut mismatches = 0u64;

    debug!(
        worker = id,
        leading_zeros_required = target.leading_zeros_required,
        target = format_args!("{:#018x}", target.target64),
        "Hash search thread started"
    );

    while !stop.load(Ordering::Relaxed) {
        let hash64 = hash_from_midstate(&midstate, nonce, header.time);
        let is_candidate = hash64 & mask == 0;

        // Cross-validate periodically and for every candidate.
        if is_candidate || local.hash_count % CROSS_VALIDATE_INTERVAL == 0 {
            let recomputed = hash_full(&header, nonce);
            if recomputed != hash64 {
                mismatches += 1;
                error!(
                    worker = id,
                    nonce = format_args!("{:#018x}", nonce),
                    got = format_args!("{:#018x}", hash64),
                    expected = format_args!("{:#018x}", recomputed),
                    "Hash cross-validation mismatch, skipping nonce"
                );
                nonce = nonce.wrapping_add(1);
                local.hash_count += 1;
                continue;
            }
        }

        if is_candidate {
            trace!(worker = id, nonce = format_args!("{:#018x}", nonce), "Nonce candidate");
            let zeros = hash64.leading_zeros();
            if zeros > local.best_leading_zeros {
                local.best_leading_zeros = zeros;
            }
            if target.met_by(hash64) {
                local.met_difficulty_count += 1;
                info!(
                    worker = id,
                    nonce = format_args!("{:#018x}", nonce),
                    hash = format_args!("{:#018x}", hash64),
                    "Nonce meets difficulty target"
                );
                let mut solved = header.clone();
                solved.nonce = nonce;
                *counters.lock() = local;
                on_solution(id, SolvedBlock { header: solved });
            }
        }

        nonce = nonce.wrapping_add(1);
        local.hash_count += 1;
        if local.hash_count % COUNTER_FLUSH_INTERVAL == 0 {
            *counters.lock() = local;
        }
    }

    *counters.lock() = local;
    info!(
        worker = id,
        total_hashes = local.hash_count,
        mismatches,
        "Hash search thread stopped"
    );
}
