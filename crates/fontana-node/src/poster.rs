//! DA poster: at-least-once delivery of locally committed blocks.
//!
//! Blocks are posted strictly in height order; a failure stops the
//! pass so a later block can never reach the DA layer before an
//! earlier one. Transient failures back off exponentially. Permanent
//! failures are alerted and retried at the ceiling - local state is
//! never rewritten.

use fontana_da::{derive_namespace, DaClient, DaError, Namespace};
use fontana_storage::{Storage, StorageError};
use fontana_types::{encode_block, Block, BlockRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const BACKOFF_MIN: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

pub struct DaPoster<C: DaClient> {
    client: Arc<C>,
    storage: Arc<Storage>,
    namespace_base: Namespace,
    poll_interval: Duration,
}

impl<C: DaClient> DaPoster<C> {
    pub fn new(
        client: Arc<C>,
        storage: Arc<Storage>,
        namespace_base: Namespace,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            storage,
            namespace_base,
            poll_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("da poster started");
        let mut backoff = Backoff::new(BACKOFF_MIN, BACKOFF_MAX);
        let mut delay = self.poll_interval;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.post_ready().await {
                Ok(_) => {
                    backoff.reset();
                    delay = self.poll_interval;
                }
                Err(e) if e.is_transient() => {
                    delay = backoff.bump();
                    warn!("da submit failed, retrying in {delay:?}: {e}");
                }
                Err(e) => {
                    // operator intervention needed; the block stays
                    // locally committed and is retried at the ceiling
                    delay = BACKOFF_MAX;
                    error!("CRITICAL: da submit failed permanently: {e}");
                }
            }
        }
        info!("da poster stopped");
    }

    /// Post every uncommitted block in ascending height order, stopping
    /// at the first failure. Returns how many were posted.
    pub async fn post_ready(&self) -> Result<usize, DaError> {
        let uncommitted = self
            .storage
            .uncommitted_blocks()
            .map_err(storage_to_da)?;

        let mut posted = 0;
        for record in uncommitted {
            let height = record.header.height;
            let block = self.assemble(&record).map_err(storage_to_da)?;
            let bytes = encode_block(&block)
                .map_err(|e| DaError::Permanent(format!("blob encoding: {e}")))?;
            let namespace = derive_namespace(&self.namespace_base, height);

            let receipt = self.client.submit_blob(namespace, bytes).await?;
            let blob_ref = receipt.blob_ref();
            self.storage
                .mark_block_da_committed(height, &blob_ref)
                .map_err(storage_to_da)?;

            info!(height, blob_ref = %blob_ref, "block posted to da");
            posted += 1;
        }
        Ok(posted)
    }

    fn assemble(&self, record: &BlockRecord) -> Result<Block, StorageError> {
        let mut transactions = Vec::with_capacity(record.txids.len());
        for txid in &record.txids {
            let tx = self.storage.fetch_transaction(txid)?.ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "block {} references missing tx {}",
                    record.header.height,
                    hex::encode(txid)
                ))
            })?;
            transactions.push(tx);
        }
        Ok(Block {
            header: record.header.clone(),
            transactions,
        })
    }
}

fn storage_to_da(e: StorageError) -> DaError {
    DaError::Transient(format!("storage: {e}"))
}

struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    fn bump(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_ceiling() {
        let mut b = Backoff::new(Duration::from_millis(500), Duration::from_secs(4));
        assert_eq!(b.bump(), Duration::from_millis(500));
        assert_eq!(b.bump(), Duration::from_secs(1));
        assert_eq!(b.bump(), Duration::from_secs(2));
        assert_eq!(b.bump(), Duration::from_secs(4));
        assert_eq!(b.bump(), Duration::from_secs(4));
        b.reset();
        assert_eq!(b.bump(), Duration::from_millis(500));
    }
}
