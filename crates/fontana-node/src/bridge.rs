//! Bridge handler: turns vault events into ledger operations.

use fontana_ledger::{Ledger, LedgerError};
use fontana_types::{Hash, VaultDeposit, WithdrawalConfirmation, WithdrawalProofBundle};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// A confirmation arrived for a burn this node never recorded; the
    /// vault watcher and the ledger disagree about history.
    #[error("unknown withdrawal for burn {}", hex::encode(.0))]
    UnknownWithdrawal(Hash),
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for BridgeError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UnknownWithdrawal(txid) => BridgeError::UnknownWithdrawal(txid),
            other => BridgeError::Ledger(other),
        }
    }
}

/// Mint an observed L1 deposit. Duplicates are non-errors: the deposit
/// row and the mint txid are both keyed by `l1_tx_hash`.
pub fn handle_deposit_received(
    ledger: &mut Ledger,
    deposit: &VaultDeposit,
) -> Result<(), BridgeError> {
    if let Some(existing) = ledger
        .storage()
        .fetch_vault_deposit(&deposit.l1_tx_hash)
        .map_err(LedgerError::from)?
    {
        if existing.processed {
            debug!(l1_tx_hash = %deposit.l1_tx_hash, "duplicate deposit ignored");
            return Ok(());
        }
    }
    ledger.process_deposit_event(deposit)?;
    Ok(())
}

/// Finalise a withdrawal after its L1 payout.
pub fn handle_withdrawal_confirmed(
    ledger: &mut Ledger,
    conf: &WithdrawalConfirmation,
) -> Result<(), BridgeError> {
    ledger.process_withdrawal_event(conf)?;
    Ok(())
}

/// Build the proof bundle the external L1 processor hands to the
/// bridge contract.
pub fn prepare_withdrawal_proofs(
    ledger: &mut Ledger,
    burn_txid: &Hash,
) -> Result<WithdrawalProofBundle, BridgeError> {
    Ok(ledger.prepare_withdrawal_proofs(burn_txid)?)
}
