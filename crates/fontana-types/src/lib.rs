//! Core types for Fontana - a pay-per-API-call rollup
//!
//! Fontana records TIA-denominated micropayments in a UTXO ledger,
//! commits the live UTXO set with a sparse Merkle tree, and anchors
//! block data to an external data-availability layer. This crate holds
//! the value types shared by every component: transactions, blocks,
//! vault (bridge) records, the canonical hashing rules, and the DA blob
//! codec.

pub mod blob;
pub mod block;
pub mod bridge;
pub mod genesis;
pub mod tx;

pub use blob::{decode_block, encode_block, CodecError};
pub use block::{Block, BlockHeader, BlockRecord};
pub use bridge::{
    UtxoInclusionProof, VaultDeposit, VaultWithdrawal, WithdrawalConfirmation,
    WithdrawalProofBundle, WithdrawalStatus,
};
pub use genesis::{GenesisConfig, GenesisError, GenesisUtxo};
pub use tx::{SignedTransaction, TxKind, TxOutput, Utxo, UtxoRef, UtxoStatus};

use sha2::{Digest, Sha256};

/// 32-byte hash
pub type Hash = [u8; 32];

/// 64-byte ed25519 signature
pub type Signature = [u8; 64];

/// 32-byte ed25519 public key
pub type PublicKey = [u8; 32];

/// 32-byte address: SHA-256 of the holder's public key
pub type Address = [u8; 32];

/// Amount in the smallest TIA unit
pub type Amount = u64;

/// Block height
pub type Height = u64;

/// Zero hash constant; also the genesis `prev_hash`.
pub const ZERO_HASH: Hash = [0u8; 32];

/// Domain tag for deposit-minted transaction ids.
pub const MINT_DOMAIN: &[u8] = b"fontana:mint:";

/// Domain tag for the genesis allocation transaction id.
pub const GENESIS_DOMAIN: &[u8] = b"fontana:genesis:";

pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Address of an ed25519 public key.
pub fn address_from_pubkey(pubkey: &PublicKey) -> Address {
    sha256(pubkey)
}

/// Txid of the mint synthesised for an L1 deposit. Deterministic in the
/// L1 transaction hash, so re-delivered deposits collide on txid.
pub fn mint_txid(l1_tx_hash: &str) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(MINT_DOMAIN);
    hasher.update(l1_tx_hash.as_bytes());
    hasher.finalize().into()
}

/// Txid under which genesis UTXOs are minted.
pub fn genesis_txid(chain_id: &str) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(GENESIS_DOMAIN);
    hasher.update(chain_id.as_bytes());
    hasher.finalize().into()
}

/// Merkle root over txids in block order. Leaves are padded with the
/// zero hash up to a power of two; an empty block commits to zero.
pub fn tx_merkle_root(txids: &[Hash]) -> Hash {
    if txids.is_empty() {
        return ZERO_HASH;
    }

    let mut level: Vec<Hash> = txids.to_vec();
    while level.len().count_ones() != 1 {
        level.push(ZERO_HASH);
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(fontana_merkle::hash_siblings(&pair[0], &pair[1]));
        }
        level = next;
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_merkle_root_empty_is_zero() {
        assert_eq!(tx_merkle_root(&[]), ZERO_HASH);
    }

    #[test]
    fn tx_merkle_root_is_order_sensitive() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_ne!(tx_merkle_root(&[a, b]), tx_merkle_root(&[b, a]));
    }

    #[test]
    fn mint_txid_is_stable_per_l1_hash() {
        assert_eq!(mint_txid("0xdead"), mint_txid("0xdead"));
        assert_ne!(mint_txid("0xdead"), mint_txid("0xbeef"));
    }
}
