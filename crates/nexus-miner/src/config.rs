//! Miner configuration.

use anyhow::{bail, Context, Result};
use nexus_llp::{CHANNEL_HASH, CHANNEL_PRIME};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete miner configuration, loaded from a TOML file and overridden by
/// CLI arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Node (wallet) host name or IP.
    #[serde(default = "default_wallet_ip")]
    pub wallet_ip: String,
    /// Node LLP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Mining algorithm: HASH or PRIME.
    #[serde(default)]
    pub mining_mode: MiningMode,
    /// Use the legacy pool protocol instead of authenticated solo mode.
    #[serde(default)]
    pub use_pool: bool,

    /// Seconds between reconnect attempts.
    #[serde(default = "default_retry_interval")]
    pub connection_retry_interval_s: u64,
    /// Seconds between GET_HEIGHT polls (pool mode only).
    #[serde(default = "default_height_interval")]
    pub get_height_interval_s: u64,
    /// Seconds between keepalive pings (pool mode only).
    #[serde(default = "default_ping_interval")]
    pub ping_interval_s: u64,
    /// Seconds between statistics summaries.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_s: u64,

    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Falcon-512 public key, hex. Mandatory in solo mode.
    #[serde(default)]
    pub falcon_miner_pubkey_hex: String,
    /// Falcon-512 private key, hex. Mandatory in solo mode.
    #[serde(default)]
    pub falcon_miner_privkey_hex: String,
    /// Sign block submissions (adds ~690 bytes per submission).
    #[serde(default = "default_true")]
    pub enable_block_signing: bool,

    /// Hardware workers.
    #[serde(default = "default_workers")]
    pub workers: Vec<WorkerConfig>,
}

/// Mining algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum MiningMode {
    /// Hash channel (2).
    #[default]
    Hash,
    /// Prime channel (1).
    Prime,
}

/// Worker hardware kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareType {
    /// CPU search thread(s).
    #[default]
    Cpu,
    /// GPU device (external kernel, not built into this binary).
    Gpu,
    /// FPGA board (external kernel, not built into this binary).
    Fpga,
}

/// One configured worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identifier for logs and stats.
    pub id: String,
    /// Hardware kind.
    #[serde(default)]
    pub hardware: HardwareType,
    /// CPU threads for this worker; 0 = one per logical core.
    #[serde(default)]
    pub threads: u16,
    /// GPU device index.
    #[serde(default)]
    pub device: u16,
    /// FPGA serial port.
    #[serde(default)]
    pub serial_port: String,
}

fn default_wallet_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8323
}
fn default_retry_interval() -> u64 {
    5
}
fn default_height_interval() -> u64 {
    2
}
fn default_ping_interval() -> u64 {
    10
}
fn default_stats_interval() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_workers() -> Vec<WorkerConfig> {
    vec![WorkerConfig {
        id: "cpu0".to_string(),
        hardware: HardwareType::Cpu,
        threads: 0,
        device: 0,
        serial_port: String::new(),
    }]
}

impl Default for MinerConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config must deserialize to defaults")
    }
}

impl MinerConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Solo mode without Falcon keys is fatal.
    pub fn validate(&self) -> Result<()> {
        if !self.use_pool
            && (self.falcon_miner_pubkey_hex.is_empty()
                || self.falcon_miner_privkey_hex.is_empty())
        {
            bail!(
                "Falcon authentication keys are required for solo mining.\n\
                 \n\
                 To set up miner authentication:\n\
                 \x20 1. Generate a keypair:   nexus-miner --create-keys\n\
                 \x20 2. Add falcon_miner_pubkey_hex and falcon_miner_privkey_hex to the config file\n\
                 \x20 3. Whitelist the public key on the node: minerallowkey=<pubkey>"
            );
        }
        if self.workers.is_empty() {
            bail!("No workers configured");
        }
        if self.connection_retry_interval_s == 0 {
            bail!("connection_retry_interval_s must be non-zero");
        }
        Ok(())
    }

    /// The wire channel for the configured mining mode.
    pub fn channel(&self) -> u32 {
        match self.mining_mode {
            MiningMode::Hash => CHANNEL_HASH,
            MiningMode::Prime => CHANNEL_PRIME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MinerConfig::default();
        assert_eq!(config.wallet_ip, "127.0.0.1");
        assert_eq!(config.port, 8323);
        assert_eq!(config.mining_mode, MiningMode::Hash);
        assert_eq!(config.channel(), CHANNEL_HASH);
        assert!(config.enable_block_signing);
        assert_eq!(config.workers.len(), 1);
        assert_eq!(config.workers[0].hardware, HardwareType::Cpu);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            wallet_ip = "10.0.0.7"
            port = 9325
            mining_mode = "PRIME"
            connection_retry_interval_s = 30
            log_level = "debug"
            falcon_miner_pubkey_hex = "aa"
            falcon_miner_privkey_hex = "bb"
            enable_block_signing = false

            [[workers]]
            id = "gpu0"
            hardware = "gpu"
            device = 1

            [[workers]]
            id = "cpu0"
            hardware = "cpu"
            threads = 4
        "#;
        let config: MinerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.wallet_ip, "10.0.0.7");
        assert_eq!(config.mining_mode, MiningMode::Prime);
        assert_eq!(config.channel(), CHANNEL_PRIME);
        assert!(!config.enable_block_signing);
        assert_eq!(config.workers.len(), 2);
        assert_eq!(config.workers[0].hardware, HardwareType::Gpu);
        assert_eq!(config.workers[1].threads, 4);
    }

    #[test]
    fn test_solo_without_keys_is_fatal() {
        let config = MinerConfig::default();
        let error = config.validate().unwrap_err().to_string();
        assert!(error.contains("--create-keys"));
        assert!(error.contains("minerallowkey"));
    }

    #[test]
    fn test_pool_mode_needs_no_keys() {
        let config: MinerConfig = toml::from_str("use_pool = true").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "use_pool = true\nwallet_ip = \"192.168.7.7\"\nport = 1234"
        )
        .unwrap();
        let config = MinerConfig::load(file.path()).unwrap();
        assert_eq!(config.wallet_ip, "192.168.7.7");
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(MinerConfig::load(Path::new("/nonexistent/miner.toml")).is_err());
    }
}
