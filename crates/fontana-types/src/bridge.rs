//! Vault (bridge) records: L1 deposits and rollup-side withdrawals.

use crate::{Address, Amount, Hash, Utxo};
use fontana_merkle::MerkleProof;
use serde::{Deserialize, Serialize};

/// A deposit observed on the L1 vault. `l1_tx_hash` is unique, which
/// makes ingestion idempotent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDeposit {
    pub l1_tx_hash: String,
    pub recipient: Address,
    pub amount: Amount,
    pub l1_height: u64,
    pub processed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    ProofReady,
    Finalised,
}

/// A withdrawal signalled by a burn transaction, finalised later on L1
/// against Merkle proofs of the burned inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultWithdrawal {
    pub burn_txid: Hash,
    pub recipient_l1: String,
    /// Amount payable on L1: burned inputs minus change and fee.
    pub amount: Amount,
    /// The last sealed state root at burn time; the burned inputs are
    /// provable against this root. Unsealed pre-burn mutations are not
    /// covered - only sealed roots are published and retained.
    pub state_root_at_burn: Hash,
    pub proof_bundle: Option<WithdrawalProofBundle>,
    pub l1_tx_hash: Option<String>,
    pub status: WithdrawalStatus,
}

/// Inclusion proof for one burned input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoInclusionProof {
    pub utxo: Utxo,
    pub proof: MerkleProof,
}

/// Everything the L1 bridge needs to pay out a withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalProofBundle {
    pub state_root: Hash,
    pub proofs: Vec<UtxoInclusionProof>,
}

/// L1-side confirmation that a withdrawal has been paid out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalConfirmation {
    pub burn_txid: Hash,
    pub l1_tx_hash: String,
}
