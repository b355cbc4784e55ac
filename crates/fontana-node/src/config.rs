//! Node configuration.
//!
//! One `Config` is built at startup (flags with `FONTANA_*` env
//! fallbacks in the binary) and injected into each component's
//! constructor. Bad values fail at startup, not mid-run.

use fontana_da::{parse_namespace_base, Namespace};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid da namespace: {0}")]
    Namespace(String),
    #[error("block interval must be non-zero")]
    ZeroBlockInterval,
    #[error("l1 poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("max batch must be non-zero when set")]
    ZeroMaxBatch,
}

#[derive(Clone, Debug)]
pub struct DaConfig {
    pub node_url: String,
    pub auth_token: Option<String>,
    /// 16 hex characters, the 8-byte base namespace.
    pub namespace_base: String,
    /// DA-side finality depth clients should wait for.
    pub confirmation_blocks: u64,
}

#[derive(Clone, Debug)]
pub struct L1Config {
    pub vault_address: String,
    pub node_url: String,
    pub poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub genesis_path: PathBuf,
    pub listen: SocketAddr,
    pub block_interval: Duration,
    /// Pending-count trigger for early block production.
    pub max_batch: Option<usize>,
    pub historical_roots_kept: usize,
    pub mailbox_capacity: usize,
    pub da: DaConfig,
    pub l1: L1Config,
}

impl Config {
    /// Check the config and return the parsed namespace base.
    pub fn validate(&self) -> Result<Namespace, ConfigError> {
        if self.block_interval.is_zero() {
            return Err(ConfigError::ZeroBlockInterval);
        }
        if self.l1.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.max_batch == Some(0) {
            return Err(ConfigError::ZeroMaxBatch);
        }
        parse_namespace_base(&self.da.namespace_base)
            .map_err(|e| ConfigError::Namespace(e.to_string()))
    }
}

pub const DEFAULT_BLOCK_INTERVAL_SECS: u64 = 6;
pub const DEFAULT_DA_CONFIRMATION_BLOCKS: u64 = 2;
pub const DEFAULT_HISTORICAL_ROOTS_KEPT: usize = 64;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
pub const DEFAULT_L1_POLL_INTERVAL_SECS: u64 = 12;
