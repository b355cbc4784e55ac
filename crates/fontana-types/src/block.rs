//! Block headers, blocks, and the persisted block record.

use crate::{Hash, Height, SignedTransaction, ZERO_HASH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Block header. `state_root` is the sparse-Merkle root over the live
/// UTXO set after every transaction in the block has been applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: Height,
    /// Hash of the previous header; all zeros for genesis.
    pub prev_hash: Hash,
    pub state_root: Hash,
    /// Merkle root over the contained txids in order.
    pub tx_merkle_root: Hash,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub tx_count: u32,
}

impl BlockHeader {
    /// Canonical header hash; links the chain via `prev_hash`.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.prev_hash);
        hasher.update(self.state_root);
        hasher.update(self.tx_merkle_root);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.tx_count.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.prev_hash == ZERO_HASH
    }
}

/// A block: header plus the full transactions in inclusion order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<SignedTransaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// The persisted form of a block.
///
/// Once `local_committed` is set the header and transaction membership
/// never change; only `da_committed` and `blob_ref` transition, and
/// `da_committed` implies a `blob_ref`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub txids: Vec<Hash>,
    pub local_committed: bool,
    pub da_committed: bool,
    pub blob_ref: Option<String>,
}

impl BlockRecord {
    pub fn new_local(header: BlockHeader, txids: Vec<Hash>) -> Self {
        Self {
            header,
            txids,
            local_committed: true,
            da_committed: false,
            blob_ref: None,
        }
    }
}
