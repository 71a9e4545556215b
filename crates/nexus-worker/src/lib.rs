//! # nexus-worker
//!
//! The worker capability seam and the CPU hash search engine.
//!
//! A worker is a black-box nonce searcher: it is seeded with a block header
//! and a difficulty target, runs on its own thread, and reports solutions
//! through a callback. The callback fires on the worker's thread; the
//! receiving side reposts it to the connection event loop before touching
//! session state.

mod difficulty;
mod hash;

pub use difficulty::{decode_bits, DifficultyTarget};
pub use hash::CpuHashWorker;

use nexus_llp::BlockHeader;
use nexus_stats::Collector;
use std::sync::Arc;

/// Worker identifier; worker `i` seeds its nonce range at `i << 48`.
pub type WorkerId = u16;

/// A solved block reported by a worker: the template header with the
/// winning nonce filled in and the merkle root echoed.
#[derive(Debug, Clone)]
pub struct SolvedBlock {
    /// The solved header.
    pub header: BlockHeader,
}

/// Solution callback. Invoked from the worker's search thread.
pub type SolutionHandler = Arc<dyn Fn(WorkerId, SolvedBlock) + Send + Sync>;

/// Capability set shared by all search engines (CPU/GPU/FPGA, hash or
/// prime). Dropping a worker signals stop and joins its thread.
pub trait Worker: Send {
    /// Preempt any current search and start searching `header` against
    /// `bits`. A non-zero `bits` overrides the header's own target (pool
    /// mode). Must return quickly; the search runs on the worker's thread.
    fn set_block(&mut self, header: BlockHeader, bits: u32, on_solution: SolutionHandler);

    /// Push this worker's counters into the collector.
    fn update_statistics(&self, collector: &Collector);
}
