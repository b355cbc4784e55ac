//! Recovery: rebuild local state by replaying DA-resident blocks.
//!
//! DA is authoritative. Every blob must decode, chain onto the
//! previous header, apply cleanly, and land exactly on the state root
//! its header commits to - anything else halts with a divergence
//! report. Replays are deterministic and idempotent: recovery picks up
//! from whatever height the store has already reached.

use fontana_da::{derive_namespace, DaClient, DaError, Namespace};
use fontana_ledger::{Ledger, LedgerError};
use fontana_storage::{Storage, StorageError};
use fontana_types::{
    decode_block, tx_merkle_root, BlockRecord, CodecError, GenesisConfig, Hash, Height,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(
        "state root mismatch at height {height}: header {} vs replayed {}",
        hex::encode(.expected),
        hex::encode(.got)
    )]
    StateRootMismatch {
        height: Height,
        expected: Hash,
        got: Hash,
    },
    #[error("chain discontinuity at height {0}")]
    ChainDiscontinuity(Height),
    #[error("tx merkle root mismatch at height {0}")]
    TxRootMismatch(Height),
    #[error("divergent transaction {} at height {height}: {source}", hex::encode(.txid))]
    Divergence {
        height: Height,
        txid: Hash,
        source: LedgerError,
    },
    #[error("malformed blob at height {0}: {1}")]
    MalformedBlob(Height, CodecError),
    #[error(transparent)]
    Da(#[from] DaError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Replay every DA blob on top of `storage`, starting from genesis on
/// an empty store. The genesis file carries the trusted root; opening
/// the ledger fails with `GenesisMismatch` if the declared allocations
/// commit to anything else. Stops cleanly at the first absent height
/// and returns the rebuilt ledger.
pub async fn recover<C: DaClient>(
    client: &C,
    namespace_base: &Namespace,
    genesis: &GenesisConfig,
    storage: Arc<Storage>,
    historical_roots_kept: usize,
) -> Result<Ledger, RecoveryError> {
    let mut ledger = Ledger::open(storage.clone(), genesis, historical_roots_kept)?;
    let start = ledger.next_height();
    info!(start_height = start, "recovery started");

    let mut height = start;
    loop {
        let namespace = derive_namespace(namespace_base, height);
        let Some(blob) = client.fetch_blob(namespace).await? else {
            break;
        };

        let block =
            decode_block(&blob.bytes).map_err(|e| RecoveryError::MalformedBlob(height, e))?;
        if block.header.height != height {
            return Err(RecoveryError::ChainDiscontinuity(height));
        }

        let prev = storage
            .fetch_block(height - 1)?
            .ok_or(RecoveryError::ChainDiscontinuity(height))?;
        if block.header.prev_hash != prev.header.hash() {
            return Err(RecoveryError::ChainDiscontinuity(height));
        }

        let txids: Vec<Hash> = block.transactions.iter().map(|t| t.txid).collect();
        if block.header.tx_merkle_root != tx_merkle_root(&txids) {
            return Err(RecoveryError::TxRootMismatch(height));
        }

        for tx in &block.transactions {
            ledger
                .apply_transaction(tx)
                .map_err(|e| RecoveryError::Divergence {
                    height,
                    txid: tx.txid,
                    source: e,
                })?;
        }

        let replayed = ledger.get_current_state_root();
        if replayed != block.header.state_root {
            return Err(RecoveryError::StateRootMismatch {
                height,
                expected: block.header.state_root,
                got: replayed,
            });
        }

        let record = BlockRecord {
            header: block.header.clone(),
            txids,
            local_committed: true,
            da_committed: true,
            blob_ref: Some(blob.blob_ref),
        };
        let mut batch = storage.batch();
        batch.insert_block(&record)?;
        for seq in ledger.pending_seqs() {
            batch.dequeue_pending(seq);
        }
        storage.commit(batch)?;
        ledger.complete_block(height);

        info!(height, tx_count = record.header.tx_count, "replayed block");
        height += 1;
    }

    info!(tip = height - 1, "recovery finished");
    Ok(ledger)
}
