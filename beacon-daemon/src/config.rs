//! Daemon configuration
//!
//! Flags with environment fallback. Validation happens once at startup;
//! the daemon refuses to run with a half-configured node or webhook.

use beacon_model::PubKey;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "beacond", version, about = "Beacon alert distribution daemon")]
pub struct Args {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Data directory for the alert and key database
    #[arg(long, env = "BEACON_DATA_DIR", default_value = "./beacon-data")]
    pub data_dir: PathBuf,

    /// P2P listen address
    #[arg(long, env = "BEACON_P2P_LISTEN", default_value = "0.0.0.0:9906")]
    pub p2p_listen: SocketAddr,

    /// Outbound peer (host:port); repeat or comma-separate for several
    #[arg(long = "peer", env = "BEACON_PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// HTTP API listen address
    #[arg(long, env = "BEACON_API_LISTEN", default_value = "127.0.0.1:9907")]
    pub api_listen: SocketAddr,

    /// Genesis public key (33-byte compressed, hex); repeat or
    /// comma-separate for the full set
    #[arg(long = "genesis-key", env = "BEACON_GENESIS_KEYS", value_delimiter = ',')]
    pub genesis_keys: Vec<String>,

    /// Signatures required per alert (m of n)
    #[arg(long, env = "BEACON_THRESHOLD", default_value_t = 3)]
    pub threshold: usize,

    /// Node JSON-RPC endpoint, e.g. http://127.0.0.1:8332
    #[arg(long, env = "BEACON_RPC_URL")]
    pub rpc_url: Option<String>,

    #[arg(long, env = "BEACON_RPC_USER")]
    pub rpc_user: Option<String>,

    #[arg(long, env = "BEACON_RPC_PASSWORD")]
    pub rpc_password: Option<String>,

    /// Run without a node: administrative actions are logged, not applied
    #[arg(long, env = "BEACON_NO_NODE")]
    pub no_node: bool,

    /// Webhook URL notified of informational alerts
    #[arg(long, env = "BEACON_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Seconds between retry passes over unprocessed alerts
    #[arg(long, env = "BEACON_RETRY_INTERVAL", default_value_t = 30)]
    pub retry_interval_secs: u64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no genesis keys configured")]
    NoGenesisKeys,

    #[error("invalid genesis key: {0}")]
    InvalidGenesisKey(String),

    #[error("threshold must be positive and at most the genesis key count")]
    InvalidThreshold,

    #[error("no rpc_url defined (pass --no-node to run without a node)")]
    NoRpcUrl,

    #[error("no rpc_user defined")]
    NoRpcUser,

    #[error("no rpc_password defined")]
    NoRpcPassword,

    #[error("webhook URL does not have a valid prefix")]
    WebhookUrlInvalidPrefix,
}

/// Node RPC connection details.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// Validated daemon configuration.
#[derive(Debug)]
pub struct Config {
    pub verbose: u8,
    pub data_dir: PathBuf,
    pub p2p_listen: SocketAddr,
    pub peers: Vec<String>,
    pub api_listen: SocketAddr,
    pub genesis_keys: Vec<PubKey>,
    pub threshold: usize,
    pub rpc: Option<RpcConfig>,
    pub webhook_url: Option<String>,
    pub retry_interval: Duration,
}

impl Args {
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.genesis_keys.is_empty() {
            return Err(ConfigError::NoGenesisKeys);
        }
        let mut genesis_keys = Vec::with_capacity(self.genesis_keys.len());
        for hex_key in &self.genesis_keys {
            let key = PubKey::from_hex(hex_key)
                .map_err(|_| ConfigError::InvalidGenesisKey(hex_key.clone()))?;
            k256::PublicKey::from_sec1_bytes(key.as_bytes())
                .map_err(|_| ConfigError::InvalidGenesisKey(hex_key.clone()))?;
            genesis_keys.push(key);
        }
        if self.threshold == 0 || self.threshold > genesis_keys.len() {
            return Err(ConfigError::InvalidThreshold);
        }

        let rpc = if self.no_node {
            None
        } else {
            Some(RpcConfig {
                url: self.rpc_url.ok_or(ConfigError::NoRpcUrl)?,
                user: self.rpc_user.ok_or(ConfigError::NoRpcUser)?,
                password: self.rpc_password.ok_or(ConfigError::NoRpcPassword)?,
            })
        };

        if let Some(url) = &self.webhook_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::WebhookUrlInvalidPrefix);
            }
        }

        Ok(Config {
            verbose: self.verbose,
            data_dir: self.data_dir,
            p2p_listen: self.p2p_listen,
            peers: self.peers,
            api_listen: self.api_listen,
            genesis_keys,
            threshold: self.threshold,
            rpc,
            webhook_url: self.webhook_url,
            retry_interval: Duration::from_secs(self.retry_interval_secs),
        })
    }
}
