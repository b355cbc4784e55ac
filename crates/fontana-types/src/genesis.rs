//! Genesis file: the declared initial UTXO set, chain id, and the
//! trusted state root the declared allocations must commit to.

use crate::{genesis_txid, Address, Amount, Hash, Utxo, UtxoStatus};
use fontana_merkle::SparseMerkleTree;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenesisError {
    #[error("failed to read genesis file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse genesis file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("genesis allocation {index}: invalid recipient {recipient:?}")]
    InvalidRecipient { index: usize, recipient: String },
    #[error("genesis allocation {index}: zero amount")]
    ZeroAmount { index: usize },
    #[error("genesis declares no allocations")]
    Empty,
    #[error("chain id is empty")]
    EmptyChainId,
    #[error("genesis state root {0:?} is not 64 hex characters")]
    InvalidStateRoot(String),
}

/// One initial allocation. The recipient is a hex-encoded address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisUtxo {
    pub recipient: String,
    pub amount: Amount,
}

impl GenesisUtxo {
    pub fn recipient_address(&self) -> Option<Address> {
        let bytes = hex::decode(&self.recipient).ok()?;
        bytes.try_into().ok()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: String,
    /// Timestamp of the genesis header, unix seconds.
    pub timestamp: u64,
    /// Trusted state root (hex). The declared allocations must commit
    /// to exactly this root; a node that computes anything else is
    /// looking at a tampered or wrong genesis file.
    pub state_root: String,
    pub utxos: Vec<GenesisUtxo>,
}

impl GenesisConfig {
    pub fn from_file(path: &Path) -> Result<Self, GenesisError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.chain_id.is_empty() {
            return Err(GenesisError::EmptyChainId);
        }
        if self.utxos.is_empty() {
            return Err(GenesisError::Empty);
        }
        if self.state_root_hash().is_none() {
            return Err(GenesisError::InvalidStateRoot(self.state_root.clone()));
        }
        for (index, alloc) in self.utxos.iter().enumerate() {
            if alloc.recipient_address().is_none() {
                return Err(GenesisError::InvalidRecipient {
                    index,
                    recipient: alloc.recipient.clone(),
                });
            }
            if alloc.amount == 0 {
                return Err(GenesisError::ZeroAmount { index });
            }
        }
        Ok(())
    }

    /// The declared trusted root.
    pub fn state_root_hash(&self) -> Option<Hash> {
        let bytes = hex::decode(&self.state_root).ok()?;
        bytes.try_into().ok()
    }

    /// The UTXOs this genesis mints, in declaration order.
    pub fn utxo_set(&self) -> Result<Vec<Utxo>, GenesisError> {
        let txid = genesis_txid(&self.chain_id);
        self.utxos
            .iter()
            .enumerate()
            .map(|(index, alloc)| {
                let recipient = alloc.recipient_address().ok_or_else(|| {
                    GenesisError::InvalidRecipient {
                        index,
                        recipient: alloc.recipient.clone(),
                    }
                })?;
                Ok(Utxo {
                    txid,
                    index: index as u32,
                    recipient,
                    amount: alloc.amount,
                    status: UtxoStatus::Unspent,
                    created_in_block: 0,
                    spent_in_block: None,
                })
            })
            .collect()
    }

    /// Root the declared allocations actually commit to. Publishers run
    /// this once to fill `state_root`; nodes recompute it and compare.
    pub fn compute_state_root(&self) -> Result<Hash, GenesisError> {
        let tree = SparseMerkleTree::from_leaves(
            self.utxo_set()?
                .iter()
                .map(|u| (u.utxo_ref().merkle_key(), u.merkle_leaf())),
        );
        Ok(tree.root())
    }
}
