//! Ledger error taxonomy.
//!
//! Validation errors are returned synchronously to the submitter and
//! leave no state behind. Storage errors mean the whole apply rolled
//! back. `StateDivergence` is fatal: the node must not keep running on
//! a store whose recomputed commitment disagrees with its headers.

use fontana_merkle::ProofError;
use fontana_storage::StorageError;
use fontana_types::{GenesisError, Hash, UtxoRef};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("input {0} not found")]
    InputNotFound(UtxoRef),
    #[error("input {0} already spent")]
    InputAlreadySpent(UtxoRef),
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u128, need: u128 },
    #[error("conservation violation: inputs {inputs} != outputs {outputs} + fee {fee}")]
    ConservationViolation {
        inputs: u128,
        outputs: u128,
        fee: u64,
    },
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Proof(#[from] ProofError),
    #[error(transparent)]
    Genesis(#[from] GenesisError),
    #[error("unknown withdrawal {}", hex::encode(.0))]
    UnknownWithdrawal(Hash),
    #[error("input {0} is not included under the withdrawal root")]
    UnprovableInput(UtxoRef),
    #[error("genesis file does not match the existing chain")]
    ChainMismatch,
    #[error(
        "genesis state root mismatch: trusted {} but allocations commit to {}",
        hex::encode(.trusted),
        hex::encode(.computed)
    )]
    GenesisMismatch { trusted: Hash, computed: Hash },
    #[error(
        "state divergence: committed root {} but recomputed {}",
        hex::encode(.committed),
        hex::encode(.recomputed)
    )]
    StateDivergence { committed: Hash, recomputed: Hash },
}

impl LedgerError {
    /// Errors the submitter can fix; everything else is on the node.
    pub fn is_validation(&self) -> bool {
        matches!(self, LedgerError::Validation(_))
    }
}
