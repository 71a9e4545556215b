//! Nexus miner client.
//!
//! Connects to a Nexus node over the LLP mining protocol, authenticates
//! with Falcon-512, and dispatches block templates to hardware workers.

use anyhow::Result;
use clap::Parser;
use nexus_crypto::MinerKeyPair;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod miner;

use config::MinerConfig;

/// Nexus LLP miner with Falcon-512 authentication.
#[derive(Parser, Debug)]
#[command(name = "nexus-miner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "miner.toml")]
    config: PathBuf,

    /// Validate the config file and exit
    #[arg(long)]
    check: bool,

    /// Generate a Falcon-512 miner keypair and exit
    #[arg(long)]
    create_keys: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.create_keys {
        // Key generation needs no config and no logger.
        create_keys();
        return Ok(());
    }

    let config = MinerConfig::load(&args.config)?;

    if args.check {
        println!("Config file {} is valid", args.config.display());
        return Ok(());
    }

    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node = format_args!("{}:{}", config.wallet_ip, config.port),
        mode = ?config.mining_mode,
        pool = config.use_pool,
        "Starting nexus-miner"
    );

    tokio::select! {
        result = miner::run(config) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Generate a Falcon-512 keypair and print config and node-whitelist
/// snippets.
fn create_keys() {
    println!();
    println!("=================================================================");
    println!("     Falcon-512 miner key generation");
    println!("=================================================================");
    println!();
    println!("Generating Falcon-512 keypair...");

    let keys = MinerKeyPair::generate();
    let pubkey_hex = keys.public_hex();
    let privkey_hex = keys.secret_hex();

    println!();
    println!("*** IMPORTANT SECURITY WARNING ***");
    println!("The private key below must be kept SECRET and SECURE!");
    println!("Anyone with access to your private key can impersonate your miner.");
    println!("Store it in a secure location and never share it.");
    println!("**********************************");
    println!();
    println!("PUBLIC KEY (share with the node operator):");
    println!("{}", pubkey_hex);
    println!();
    println!("PRIVATE KEY (keep secret!):");
    println!("{}", *privkey_hex);
    println!();
    println!("=================================================================");
    println!("Configuration snippets");
    println!("=================================================================");
    println!();
    println!("Add to your miner.toml:");
    println!("--------------------");
    println!("falcon_miner_pubkey_hex = \"{}\"", pubkey_hex);
    println!("falcon_miner_privkey_hex = \"{}\"", *privkey_hex);
    println!();
    println!("Node operator should whitelist your miner:");
    println!("--------------------");
    println!("minerallowkey={}", pubkey_hex);
    println!();
    println!("Key generation complete.");
}
