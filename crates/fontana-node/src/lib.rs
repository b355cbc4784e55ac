//! Fontana rollup node.
//!
//! Wires the ledger into a running service: a single-writer core that
//! applies transactions and produces blocks on a steady cadence, a DA
//! poster that ships locally committed blocks to the data-availability
//! layer, a vault watcher feeding L1 deposits and withdrawal
//! finalisations into the bridge handler, recovery by DA replay, and a
//! thin HTTP surface.

pub mod api;
pub mod bridge;
pub mod config;
pub mod l1;
pub mod node;
pub mod poster;
pub mod recovery;
pub mod sequencer;

pub use api::{router, ApiState};
pub use bridge::BridgeError;
pub use config::{Config, ConfigError, DaConfig, L1Config};
pub use l1::{HttpL1Client, L1Client, L1Error, MemoryL1, VaultWatcher};
pub use node::{ChainStatus, Node, NodeHandle, NodeMsg, TxReceipt};
pub use poster::DaPoster;
pub use recovery::{recover, RecoveryError};
pub use sequencer::Sequencer;
