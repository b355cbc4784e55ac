//! Block production.
//!
//! Single-writer: the sequencer runs on the same task that owns the
//! ledger, so the height sequence and the root-per-block pairing cannot
//! race. A block always carries the entire pending set; the `max_batch`
//! cap triggers early production, it never splits the applied set (a
//! split would leave the header's state root covering transactions the
//! block does not contain).

use fontana_ledger::{Ledger, LedgerError};
use fontana_storage::StorageError;
use fontana_types::BlockRecord;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

#[derive(Clone, Debug)]
pub struct Sequencer {
    pub block_interval: Duration,
    pub max_batch: Option<usize>,
}

impl Sequencer {
    pub fn new(block_interval: Duration, max_batch: Option<usize>) -> Self {
        Self {
            block_interval,
            max_batch,
        }
    }

    /// Whether the pending count has hit the early-production trigger.
    pub fn batch_full(&self, pending: usize) -> bool {
        self.max_batch.is_some_and(|cap| pending >= cap)
    }

    /// Build, persist, and seal the next block. Empty pending sets
    /// still produce a block so the chain keeps its cadence.
    pub fn build_block(&self, ledger: &mut Ledger) -> Result<BlockRecord, LedgerError> {
        let storage = ledger.storage().clone();
        let prev = storage.latest_block()?.ok_or_else(|| {
            LedgerError::Storage(StorageError::Corrupt("no genesis block".into()))
        })?;

        let (header, txids) = ledger.build_header(&prev.header, now_ts())?;
        let record = BlockRecord::new_local(header, txids);

        let mut batch = storage.batch();
        batch.insert_block(&record)?;
        for seq in ledger.pending_seqs() {
            batch.dequeue_pending(seq);
        }
        storage.commit(batch)?;
        ledger.complete_block(record.header.height);

        info!(
            height = record.header.height,
            tx_count = record.header.tx_count,
            state_root = %hex::encode(record.header.state_root),
            "sealed block"
        );
        Ok(record)
    }
}

/// Unix timestamp in seconds.
pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs()
}
