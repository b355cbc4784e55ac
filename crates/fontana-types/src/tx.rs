//! Signed transactions and UTXO references.

use crate::{Address, Amount, Hash, Height, PublicKey, Signature};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::{Digest, Sha256};

/// Reference to a transaction output: `(txid, output index)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoRef {
    pub txid: Hash,
    pub index: u32,
}

impl UtxoRef {
    pub fn new(txid: Hash, index: u32) -> Self {
        Self { txid, index }
    }

    /// Sparse-Merkle key for this output: `SHA-256(txid || index)`.
    pub fn merkle_key(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.txid);
        hasher.update(self.index.to_le_bytes());
        hasher.finalize().into()
    }
}

impl std::fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.index)
    }
}

/// A newly created output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub recipient: Address,
    pub amount: Amount,
}

/// Whether an output is still spendable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UtxoStatus {
    Unspent,
    Spent,
}

/// A ledger entry for one transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Hash,
    pub index: u32,
    pub recipient: Address,
    pub amount: Amount,
    pub status: UtxoStatus,
    pub created_in_block: Height,
    pub spent_in_block: Option<Height>,
}

impl Utxo {
    pub fn utxo_ref(&self) -> UtxoRef {
        UtxoRef::new(self.txid, self.index)
    }

    /// Leaf hash committed into the state tree:
    /// `SHA-256(recipient || amount || txid || index)`.
    pub fn merkle_leaf(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.recipient);
        hasher.update(self.amount.to_le_bytes());
        hasher.update(self.txid);
        hasher.update(self.index.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn is_unspent(&self) -> bool {
        self.status == UtxoStatus::Unspent
    }
}

/// Transaction kind. Mints credit L1 deposits, burns signal L1
/// withdrawals, transfers move value inside the rollup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Transfer,
    Mint,
    Burn,
}

impl TxKind {
    fn tag(self) -> u8 {
        match self {
            TxKind::Transfer => 0,
            TxKind::Mint => 1,
            TxKind::Burn => 2,
        }
    }
}

/// A signed rollup transaction.
///
/// `txid` is the SHA-256 of the canonical encoding of every field except
/// the signature; the signature signs the txid. `payload_hash` binds the
/// transaction to the off-chain API payload it pays for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub txid: Hash,
    pub inputs: Vec<UtxoRef>,
    pub outputs: Vec<TxOutput>,
    pub fee: Amount,
    pub payload_hash: Hash,
    pub sender_pubkey: PublicKey,
    #[serde(with = "BigArray")]
    pub signature: Signature,
    pub kind: TxKind,
}

impl SignedTransaction {
    /// Canonical txid: a field-by-field hash in fixed order with
    /// length-prefixed vectors and little-endian integers. The signature
    /// is excluded so it can sign this value.
    pub fn compute_txid(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update((self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.txid);
            hasher.update(input.index.to_le_bytes());
        }
        hasher.update((self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.recipient);
            hasher.update(output.amount.to_le_bytes());
        }
        hasher.update(self.fee.to_le_bytes());
        hasher.update(self.payload_hash);
        hasher.update(self.sender_pubkey);
        hasher.update([self.kind.tag()]);
        hasher.finalize().into()
    }

    /// Message covered by the signature.
    pub fn signing_message(&self) -> Hash {
        self.compute_txid()
    }

    /// Sum of output amounts, without overflow.
    pub fn output_total(&self) -> u128 {
        self.outputs.iter().map(|o| o.amount as u128).sum()
    }

    pub fn sender_address(&self) -> Address {
        crate::address_from_pubkey(&self.sender_pubkey)
    }
}
