//! Miner orchestration: builds the workers, the session policy and the
//! connection manager, and wires the template feed and solution paths
//! between them.
//!
//! The connection event loop is the only place session state is mutated.
//! Workers run on their own threads and meet the async world twice: the
//! feed handler calls `set_block` (briefly, under the worker-list mutex)
//! and the solution callback reposts into the event loop's channel.

use crate::config::{HardwareType, MinerConfig, MiningMode};
use anyhow::{bail, Context, Result};
use nexus_crypto::{FalconSigner, MinerKeyPair};
use nexus_protocol::{
    ConnectionConfig, ConnectionManager, FeedHandler, MiningProtocol, PoolProtocol, SoloProtocol,
};
use nexus_stats::Collector;
use nexus_worker::{CpuHashWorker, SolutionHandler, SolvedBlock, Worker, WorkerId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

type WorkerList = Arc<Mutex<Vec<Box<dyn Worker>>>>;

/// Build and run the miner until the task is cancelled.
pub async fn run(config: MinerConfig) -> Result<()> {
    let workers = build_workers(&config)?;
    let worker_count = workers.lock().len();
    let stats = Arc::new(Collector::new(worker_count));

    let (solution_tx, solution_rx) = mpsc::channel::<(WorkerId, SolvedBlock)>(worker_count.max(1) * 2);

    let connection = ConnectionConfig {
        host: config.wallet_ip.clone(),
        port: config.port,
        connect_timeout: Duration::from_secs(10),
        retry_interval: Duration::from_secs(config.connection_retry_interval_s),
        ping_interval: Duration::from_secs(config.ping_interval_s),
        height_interval: Duration::from_secs(config.get_height_interval_s),
    };

    if config.use_pool {
        info!(channel = config.channel(), "Starting in pool mode");
        let protocol = PoolProtocol::new(config.channel(), Arc::clone(&stats));
        run_session(&config, connection, protocol, workers, stats, solution_tx, solution_rx).await
    } else {
        info!(channel = config.channel(), "Starting in authenticated solo mode");
        let keys = MinerKeyPair::from_hex(
            &config.falcon_miner_pubkey_hex,
            &config.falcon_miner_privkey_hex,
        )
        .context(
            "Failed to parse Falcon keys from config; regenerate with nexus-miner --create-keys",
        )?;
        let signer = Arc::new(FalconSigner::new(keys));
        let mut protocol = SoloProtocol::new(
            config.channel(),
            config.wallet_ip.clone(),
            signer,
            Arc::clone(&stats),
        );
        protocol.enable_block_signing(config.enable_block_signing);
        if config.enable_block_signing {
            info!("Block signing enabled (adds ~690 bytes per submission)");
        } else {
            info!("Block signing disabled");
        }
        run_session(&config, connection, protocol, workers, stats, solution_tx, solution_rx).await
    }
}

/// Wire one session policy to the workers and drive it.
async fn run_session<P: MiningProtocol + 'static>(
    config: &MinerConfig,
    connection: ConnectionConfig,
    mut protocol: P,
    workers: WorkerList,
    stats: Arc<Collector>,
    solution_tx: mpsc::Sender<(WorkerId, SolvedBlock)>,
    solution_rx: mpsc::Receiver<(WorkerId, SolvedBlock)>,
) -> Result<()> {
    // Worker -> event loop: repost solutions onto the connection task. The
    // callback runs on a worker thread and must never block there: a worker
    // stuck in a full-channel send cannot observe its stop flag, and the
    // event loop may be joining that same thread during preemption.
    let on_solution: SolutionHandler = Arc::new(move |worker, solved| {
        if let Err(e) = solution_tx.try_send((worker, solved)) {
            error!(worker, error = %e, "Dropping solution, channel unavailable");
        }
    });

    // Event loop -> workers: preempt and reseed every worker on a new
    // template.
    let feed_workers = Arc::clone(&workers);
    let feed: FeedHandler = Box::new(move |header, bits| {
        let mut workers = feed_workers.lock();
        for worker in workers.iter_mut() {
            worker.set_block(header.clone(), bits, Arc::clone(&on_solution));
        }
    });
    protocol.set_feed_handler(feed);

    // Periodic statistics pull and render.
    let stats_workers = Arc::clone(&workers);
    let stats_reader = Arc::clone(&stats);
    let interval = Duration::from_secs(config.stats_interval_s.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for worker in stats_workers.lock().iter() {
                worker.update_statistics(&stats_reader);
            }
            stats_reader.log_summary();
        }
    });

    let manager = ConnectionManager::new(connection, protocol, solution_rx, stats);
    manager.run().await;
    Ok(())
}

/// Instantiate the configured workers. GPU and FPGA search engines live in
/// external kernels; configuring them here logs an error and creates
/// nothing, mirroring a build without those engines.
fn build_workers(config: &MinerConfig) -> Result<WorkerList> {
    let mut workers: Vec<Box<dyn Worker>> = Vec::new();
    let mut internal_id: WorkerId = 0;

    for worker_config in &config.workers {
        match worker_config.hardware {
            HardwareType::Cpu => {
                if config.mining_mode == MiningMode::Prime {
                    error!(
                        id = %worker_config.id,
                        "Prime search engine not built into this binary, no worker created"
                    );
                    continue;
                }
                let threads = if worker_config.threads == 0 {
                    num_cpus::get() as u16
                } else {
                    worker_config.threads
                };
                info!(id = %worker_config.id, threads, "Creating CPU hash workers");
                for _ in 0..threads {
                    workers.push(Box::new(CpuHashWorker::new(internal_id)));
                    internal_id += 1;
                }
            }
            HardwareType::Gpu => {
                error!(
                    id = %worker_config.id,
                    device = worker_config.device,
                    "GPU search engine not built into this binary, no worker created"
                );
            }
            HardwareType::Fpga => {
                error!(
                    id = %worker_config.id,
                    serial_port = %worker_config.serial_port,
                    "FPGA search engine not built into this binary, no worker created"
                );
            }
        }
    }

    if workers.is_empty() {
        bail!("No usable workers for the configured mining mode");
    }
    if workers.len() > 1 {
        warn!(
            count = workers.len(),
            "Multiple workers share one machine; nonce ranges are disjoint by worker id"
        );
    }
    Ok(Arc::new(Mutex::new(workers)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;

    fn base_config() -> MinerConfig {
        MinerConfig {
            use_pool: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_cpu_workers_expands_threads() {
        let mut config = base_config();
        config.workers = vec![WorkerConfig {
            id: "cpu0".into(),
            hardware: HardwareType::Cpu,
            threads: 3,
            device: 0,
            serial_port: String::new(),
        }];
        let workers = build_workers(&config).unwrap();
        assert_eq!(workers.lock().len(), 3);
    }

    #[test]
    fn test_auto_thread_detection() {
        let config = base_config();
        let workers = build_workers(&config).unwrap();
        assert_eq!(workers.lock().len(), num_cpus::get());
    }

    #[test]
    fn test_gpu_only_config_has_no_workers() {
        let mut config = base_config();
        config.workers = vec![WorkerConfig {
            id: "gpu0".into(),
            hardware: HardwareType::Gpu,
            threads: 0,
            device: 0,
            serial_port: String::new(),
        }];
        assert!(build_workers(&config).is_err());
    }

    #[test]
    fn test_prime_mode_creates_no_cpu_workers() {
        let mut config = base_config();
        config.mining_mode = MiningMode::Prime;
        assert!(build_workers(&config).is_err());
    }
}
