//! storage layer: sled tables for UTXOs, transactions, blocks and vault
//! events.
//!
//! Logical tables are one-byte key prefixes on a single sled tree;
//! values are bincode. Multi-table writes are staged in a [`WriteBatch`]
//! and committed with one atomic `apply_batch`: a batch that is dropped
//! instead of committed has no effect, which is the rollback path.
//!
//! The node is single-writer for ledger state, so check-then-commit is
//! race-free. The DA poster only touches `da_committed`/`blob_ref` on
//! existing block records, a disjoint write set.

use fontana_types::{
    Address, Amount, BlockRecord, Hash, Height, SignedTransaction, Utxo, UtxoRef,
    UtxoStatus, VaultDeposit, VaultWithdrawal,
};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend: {0}")]
    Backend(#[from] sled::Error),
    #[error("storage codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("block {0} not found")]
    BlockNotFound(Height),
    #[error("storage corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

// key prefixes
const P_UTXO: u8 = b'u';
const P_ADDR: u8 = b'a';
const P_TX: u8 = b't';
const P_BLOCK: u8 = b'b';
const P_DEPOSIT: u8 = b'd';
const P_WITHDRAWAL: u8 = b'w';
const P_PENDING: u8 = b'q';
const P_SYSVAR: u8 = b's';

/// System variable names.
pub const VAR_LAST_L1_HEIGHT: &str = "last_l1_height";
pub const VAR_LAST_DA_HEIGHT: &str = "last_da_height";
pub const VAR_PENDING_SEQ: &str = "pending_seq";

#[derive(Debug)]
pub struct Storage {
    db: sled::Db,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self> {
        info!("opening storage at {}", path.display());
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory database for tests and recovery dry-runs.
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn batch(&self) -> WriteBatch {
        WriteBatch {
            batch: sled::Batch::default(),
        }
    }

    /// Apply a staged batch atomically.
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.db.apply_batch(batch.batch)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // ===== UTXOS =====

    pub fn fetch_utxo(&self, utxo_ref: &UtxoRef) -> Result<Option<Utxo>> {
        self.get(&utxo_key(utxo_ref))
    }

    /// The referenced output, only while still unspent.
    pub fn fetch_unspent(&self, utxo_ref: &UtxoRef) -> Result<Option<Utxo>> {
        Ok(self
            .fetch_utxo(utxo_ref)?
            .filter(|u| u.status == UtxoStatus::Unspent))
    }

    pub fn fetch_unspent_by_address(&self, address: &Address) -> Result<Vec<Utxo>> {
        let mut prefix = Vec::with_capacity(33);
        prefix.push(P_ADDR);
        prefix.extend_from_slice(address);

        let mut utxos = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (key, _) = item?;
            let utxo_ref = addr_key_to_ref(&key)?;
            let utxo = self.fetch_utxo(&utxo_ref)?.ok_or_else(|| {
                StorageError::Corrupt(format!("address index points at missing utxo {utxo_ref}"))
            })?;
            utxos.push(utxo);
        }
        Ok(utxos)
    }

    /// Sum of unspent amounts for an address, straight off the index.
    pub fn balance(&self, address: &Address) -> Result<Amount> {
        let mut prefix = Vec::with_capacity(33);
        prefix.push(P_ADDR);
        prefix.extend_from_slice(address);

        let mut total: Amount = 0;
        for item in self.db.scan_prefix(&prefix) {
            let (_, value) = item?;
            let bytes: [u8; 8] = value
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::Corrupt("bad address index value".into()))?;
            total = total.saturating_add(Amount::from_le_bytes(bytes));
        }
        Ok(total)
    }

    /// Every unspent output; used to rebuild the state tree on open.
    pub fn all_unspent(&self) -> Result<Vec<Utxo>> {
        let mut utxos = Vec::new();
        for item in self.db.scan_prefix([P_UTXO]) {
            let (_, value) = item?;
            let utxo: Utxo = bincode::deserialize(&value)?;
            if utxo.status == UtxoStatus::Unspent {
                utxos.push(utxo);
            }
        }
        Ok(utxos)
    }

    // ===== TRANSACTIONS =====

    pub fn fetch_transaction(&self, txid: &Hash) -> Result<Option<SignedTransaction>> {
        self.get(&tx_key(txid))
    }

    pub fn has_transaction(&self, txid: &Hash) -> Result<bool> {
        Ok(self.db.contains_key(tx_key(txid))?)
    }

    // ===== BLOCKS =====

    pub fn fetch_block(&self, height: Height) -> Result<Option<BlockRecord>> {
        self.get(&block_key(height))
    }

    pub fn latest_block(&self) -> Result<Option<BlockRecord>> {
        for item in self.db.scan_prefix([P_BLOCK]).rev() {
            let (_, value) = item?;
            return Ok(Some(bincode::deserialize(&value)?));
        }
        Ok(None)
    }

    /// Blocks not yet committed to the DA layer, ascending by height.
    pub fn uncommitted_blocks(&self) -> Result<Vec<BlockRecord>> {
        let mut records = Vec::new();
        for item in self.db.scan_prefix([P_BLOCK]) {
            let (_, value) = item?;
            let record: BlockRecord = bincode::deserialize(&value)?;
            if !record.da_committed {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Flip a locally committed block to DA-committed. The header and
    /// membership are left untouched.
    pub fn mark_block_da_committed(&self, height: Height, blob_ref: &str) -> Result<()> {
        let mut record = self
            .fetch_block(height)?
            .ok_or(StorageError::BlockNotFound(height))?;
        if !record.local_committed {
            return Err(StorageError::Corrupt(format!(
                "block {height} is not locally committed"
            )));
        }
        record.da_committed = true;
        record.blob_ref = Some(blob_ref.to_string());
        self.db
            .insert(block_key(height), bincode::serialize(&record)?)?;
        self.db
            .insert(var_key(VAR_LAST_DA_HEIGHT), &height.to_le_bytes())?;
        Ok(())
    }

    // ===== VAULT =====

    pub fn fetch_vault_deposit(&self, l1_tx_hash: &str) -> Result<Option<VaultDeposit>> {
        self.get(&deposit_key(l1_tx_hash))
    }

    pub fn fetch_vault_withdrawal(&self, burn_txid: &Hash) -> Result<Option<VaultWithdrawal>> {
        self.get(&withdrawal_key(burn_txid))
    }

    pub fn upsert_vault_withdrawal(&self, withdrawal: &VaultWithdrawal) -> Result<()> {
        self.db.insert(
            withdrawal_key(&withdrawal.burn_txid),
            bincode::serialize(withdrawal)?,
        )?;
        Ok(())
    }

    // ===== PENDING QUEUE =====

    /// Applied-but-unsequenced transactions, ascending by arrival.
    pub fn pending_queue(&self) -> Result<Vec<(u64, Hash)>> {
        let mut pending = Vec::new();
        for item in self.db.scan_prefix([P_PENDING]) {
            let (key, value) = item?;
            let seq_bytes: [u8; 8] = key[1..]
                .try_into()
                .map_err(|_| StorageError::Corrupt("bad pending key".into()))?;
            let txid: Hash = value
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::Corrupt("bad pending value".into()))?;
            pending.push((u64::from_be_bytes(seq_bytes), txid));
        }
        Ok(pending)
    }

    // ===== SYSTEM VARS =====

    pub fn get_var(&self, name: &str) -> Result<Option<u64>> {
        match self.db.get(var_key(name))? {
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_ref()
                    .try_into()
                    .map_err(|_| StorageError::Corrupt(format!("bad system var {name}")))?;
                Ok(Some(u64::from_le_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn set_var(&self, name: &str, value: u64) -> Result<()> {
        self.db.insert(var_key(name), &value.to_le_bytes())?;
        Ok(())
    }

    fn get<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}

/// Staged writes, committed atomically via [`Storage::commit`].
pub struct WriteBatch {
    batch: sled::Batch,
}

impl WriteBatch {
    pub fn insert_utxo(&mut self, utxo: &Utxo) -> Result<()> {
        let utxo_ref = utxo.utxo_ref();
        self.batch
            .insert(utxo_key(&utxo_ref), bincode::serialize(utxo)?);
        if utxo.status == UtxoStatus::Unspent {
            self.batch.insert(
                addr_key(&utxo.recipient, &utxo_ref),
                utxo.amount.to_le_bytes().to_vec(),
            );
        }
        Ok(())
    }

    /// Rewrite an output as spent and drop it from the address index.
    pub fn mark_utxo_spent(&mut self, utxo: &Utxo, height: Height) -> Result<()> {
        let mut spent = utxo.clone();
        spent.status = UtxoStatus::Spent;
        spent.spent_in_block = Some(height);
        let utxo_ref = utxo.utxo_ref();
        self.batch
            .insert(utxo_key(&utxo_ref), bincode::serialize(&spent)?);
        self.batch.remove(addr_key(&utxo.recipient, &utxo_ref));
        Ok(())
    }

    pub fn insert_transaction(&mut self, tx: &SignedTransaction) -> Result<()> {
        self.batch.insert(tx_key(&tx.txid), bincode::serialize(tx)?);
        Ok(())
    }

    pub fn insert_block(&mut self, record: &BlockRecord) -> Result<()> {
        self.batch
            .insert(block_key(record.header.height), bincode::serialize(record)?);
        Ok(())
    }

    pub fn insert_vault_deposit(&mut self, deposit: &VaultDeposit) -> Result<()> {
        self.batch.insert(
            deposit_key(&deposit.l1_tx_hash),
            bincode::serialize(deposit)?,
        );
        Ok(())
    }

    pub fn upsert_vault_withdrawal(&mut self, withdrawal: &VaultWithdrawal) -> Result<()> {
        self.batch.insert(
            withdrawal_key(&withdrawal.burn_txid),
            bincode::serialize(withdrawal)?,
        );
        Ok(())
    }

    pub fn queue_pending(&mut self, seq: u64, txid: &Hash) {
        self.batch.insert(pending_key(seq), txid.to_vec());
    }

    pub fn dequeue_pending(&mut self, seq: u64) {
        self.batch.remove(pending_key(seq));
    }

    pub fn set_var(&mut self, name: &str, value: u64) {
        self.batch.insert(var_key(name), &value.to_le_bytes());
    }
}

// ===== KEY LAYOUT =====

fn utxo_key(utxo_ref: &UtxoRef) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(P_UTXO);
    key.extend_from_slice(&utxo_ref.txid);
    key.extend_from_slice(&utxo_ref.index.to_le_bytes());
    key
}

fn addr_key(address: &Address, utxo_ref: &UtxoRef) -> Vec<u8> {
    let mut key = Vec::with_capacity(69);
    key.push(P_ADDR);
    key.extend_from_slice(address);
    key.extend_from_slice(&utxo_ref.txid);
    key.extend_from_slice(&utxo_ref.index.to_le_bytes());
    key
}

fn addr_key_to_ref(key: &[u8]) -> Result<UtxoRef> {
    if key.len() != 69 {
        return Err(StorageError::Corrupt("bad address index key".into()));
    }
    let txid: Hash = key[33..65].try_into().expect("sliced to 32 bytes");
    let index = u32::from_le_bytes(key[65..69].try_into().expect("sliced to 4 bytes"));
    Ok(UtxoRef::new(txid, index))
}

fn tx_key(txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(P_TX);
    key.extend_from_slice(txid);
    key
}

// big-endian so lexicographic scan order is height order
fn block_key(height: Height) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(P_BLOCK);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn deposit_key(l1_tx_hash: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + l1_tx_hash.len());
    key.push(P_DEPOSIT);
    key.extend_from_slice(l1_tx_hash.as_bytes());
    key
}

fn withdrawal_key(burn_txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(P_WITHDRAWAL);
    key.extend_from_slice(burn_txid);
    key
}

fn pending_key(seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(P_PENDING);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn var_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(P_SYSVAR);
    key.extend_from_slice(name.as_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use fontana_types::{BlockHeader, TxKind, TxOutput, ZERO_HASH};
    use tempfile::tempdir;

    fn utxo(txid_byte: u8, index: u32, recipient: Address, amount: Amount) -> Utxo {
        Utxo {
            txid: [txid_byte; 32],
            index,
            recipient,
            amount,
            status: UtxoStatus::Unspent,
            created_in_block: 1,
            spent_in_block: None,
        }
    }

    fn header(height: Height) -> BlockHeader {
        BlockHeader {
            height,
            prev_hash: [height as u8; 32],
            state_root: [2u8; 32],
            tx_merkle_root: ZERO_HASH,
            timestamp: 1_700_000_000 + height,
            tx_count: 0,
        }
    }

    #[test]
    fn utxo_roundtrip_and_address_index() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let addr = [7u8; 32];
        let u = utxo(1, 0, addr, 100);

        let mut batch = storage.batch();
        batch.insert_utxo(&u).unwrap();
        storage.commit(batch).unwrap();

        assert_eq!(storage.fetch_unspent(&u.utxo_ref()).unwrap(), Some(u.clone()));
        assert_eq!(storage.balance(&addr).unwrap(), 100);
        assert_eq!(storage.fetch_unspent_by_address(&addr).unwrap().len(), 1);

        // spend it
        let mut batch = storage.batch();
        batch.mark_utxo_spent(&u, 5).unwrap();
        storage.commit(batch).unwrap();

        assert_eq!(storage.fetch_unspent(&u.utxo_ref()).unwrap(), None);
        assert_eq!(storage.balance(&addr).unwrap(), 0);
        let spent = storage.fetch_utxo(&u.utxo_ref()).unwrap().unwrap();
        assert_eq!(spent.status, UtxoStatus::Spent);
        assert_eq!(spent.spent_in_block, Some(5));
    }

    #[test]
    fn dropped_batch_writes_nothing() {
        let storage = Storage::open_temporary().unwrap();
        let u = utxo(1, 0, [7u8; 32], 100);

        let mut batch = storage.batch();
        batch.insert_utxo(&u).unwrap();
        drop(batch);

        assert_eq!(storage.fetch_utxo(&u.utxo_ref()).unwrap(), None);
    }

    #[test]
    fn uncommitted_blocks_are_ascending() {
        let storage = Storage::open_temporary().unwrap();

        for height in [0u64, 1, 2, 3] {
            let mut batch = storage.batch();
            batch
                .insert_block(&BlockRecord::new_local(header(height), vec![]))
                .unwrap();
            storage.commit(batch).unwrap();
        }
        storage.mark_block_da_committed(1, "da:10:abc").unwrap();

        let uncommitted = storage.uncommitted_blocks().unwrap();
        let heights: Vec<_> = uncommitted.iter().map(|r| r.header.height).collect();
        assert_eq!(heights, vec![0, 2, 3]);

        let latest = storage.latest_block().unwrap().unwrap();
        assert_eq!(latest.header.height, 3);
    }

    #[test]
    fn mark_da_committed_sets_blob_ref() {
        let storage = Storage::open_temporary().unwrap();
        let mut batch = storage.batch();
        batch
            .insert_block(&BlockRecord::new_local(header(4), vec![]))
            .unwrap();
        storage.commit(batch).unwrap();

        storage.mark_block_da_committed(4, "da:77:Zm9v").unwrap();
        let record = storage.fetch_block(4).unwrap().unwrap();
        assert!(record.da_committed);
        assert!(record.local_committed);
        assert_eq!(record.blob_ref.as_deref(), Some("da:77:Zm9v"));
        assert_eq!(storage.get_var(VAR_LAST_DA_HEIGHT).unwrap(), Some(4));

        assert!(matches!(
            storage.mark_block_da_committed(99, "da:1:x"),
            Err(StorageError::BlockNotFound(99))
        ));
    }

    #[test]
    fn pending_queue_is_fifo() {
        let storage = Storage::open_temporary().unwrap();
        let mut batch = storage.batch();
        batch.queue_pending(2, &[2u8; 32]);
        batch.queue_pending(1, &[1u8; 32]);
        batch.queue_pending(300, &[3u8; 32]);
        storage.commit(batch).unwrap();

        let pending = storage.pending_queue().unwrap();
        let seqs: Vec<_> = pending.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, vec![1, 2, 300]);

        let mut batch = storage.batch();
        batch.dequeue_pending(1);
        storage.commit(batch).unwrap();
        assert_eq!(storage.pending_queue().unwrap().len(), 2);
    }

    #[test]
    fn sysvars_roundtrip() {
        let storage = Storage::open_temporary().unwrap();
        assert_eq!(storage.get_var(VAR_LAST_L1_HEIGHT).unwrap(), None);
        storage.set_var(VAR_LAST_L1_HEIGHT, 42).unwrap();
        assert_eq!(storage.get_var(VAR_LAST_L1_HEIGHT).unwrap(), Some(42));
    }

    #[test]
    fn vault_records_roundtrip() {
        let storage = Storage::open_temporary().unwrap();

        let deposit = VaultDeposit {
            l1_tx_hash: "0xdead".into(),
            recipient: [7u8; 32],
            amount: 50,
            l1_height: 12,
            processed: false,
        };
        let mut batch = storage.batch();
        batch.insert_vault_deposit(&deposit).unwrap();
        storage.commit(batch).unwrap();
        assert_eq!(
            storage.fetch_vault_deposit("0xdead").unwrap(),
            Some(deposit)
        );
        assert_eq!(storage.fetch_vault_deposit("0xbeef").unwrap(), None);

        let withdrawal = VaultWithdrawal {
            burn_txid: [9u8; 32],
            recipient_l1: "tia1xyz".into(),
            amount: 30,
            state_root_at_burn: [4u8; 32],
            proof_bundle: None,
            l1_tx_hash: None,
            status: fontana_types::WithdrawalStatus::Pending,
        };
        storage.upsert_vault_withdrawal(&withdrawal).unwrap();
        assert_eq!(
            storage.fetch_vault_withdrawal(&[9u8; 32]).unwrap(),
            Some(withdrawal)
        );
    }

    #[test]
    fn all_unspent_filters_spent_outputs() {
        let storage = Storage::open_temporary().unwrap();
        let a = utxo(1, 0, [7u8; 32], 10);
        let b = utxo(2, 0, [8u8; 32], 20);

        let mut batch = storage.batch();
        batch.insert_utxo(&a).unwrap();
        batch.insert_utxo(&b).unwrap();
        batch.mark_utxo_spent(&a, 3).unwrap();
        storage.commit(batch).unwrap();

        let unspent = storage.all_unspent().unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].txid, b.txid);
    }

    #[test]
    fn transactions_roundtrip() {
        let storage = Storage::open_temporary().unwrap();
        let mut tx = SignedTransaction {
            txid: ZERO_HASH,
            inputs: vec![UtxoRef::new([1u8; 32], 0)],
            outputs: vec![TxOutput {
                recipient: [2u8; 32],
                amount: 5,
            }],
            fee: 0,
            payload_hash: ZERO_HASH,
            sender_pubkey: [3u8; 32],
            signature: [0u8; 64],
            kind: TxKind::Transfer,
        };
        tx.txid = tx.compute_txid();

        let mut batch = storage.batch();
        batch.insert_transaction(&tx).unwrap();
        storage.commit(batch).unwrap();

        assert!(storage.has_transaction(&tx.txid).unwrap());
        assert_eq!(storage.fetch_transaction(&tx.txid).unwrap(), Some(tx));
    }
}
