//! UTXO ledger for Fontana.
//!
//! The ledger validates signed transactions and applies them atomically
//! against sled-backed tables while mirroring every live output into a
//! sparse Merkle tree. The tree root is the state commitment carried by
//! block headers; recently sealed roots stay provable for withdrawal
//! proofs.
//!
//! Validation is fail-fast and deterministic: structure, then
//! signature, then input existence and ownership, then conservation.
//! A transaction that fails any step leaves no trace.

pub mod error;

pub use error::{LedgerError, ValidationError};

use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use fontana_merkle::{MerkleProof, SparseMerkleTree, VersionedTree};
use fontana_storage::{Storage, WriteBatch, VAR_PENDING_SEQ};
use fontana_types::{
    genesis_txid, mint_txid, tx_merkle_root, Amount, BlockHeader, BlockRecord, GenesisConfig,
    Hash, Height, SignedTransaction, TxKind, Utxo, UtxoInclusionProof, UtxoRef, UtxoStatus,
    VaultDeposit, VaultWithdrawal, WithdrawalConfirmation, WithdrawalProofBundle,
    WithdrawalStatus, ZERO_HASH,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug)]
pub struct Ledger {
    storage: Arc<Storage>,
    tree: VersionedTree,
    /// Applied-but-unsequenced transactions in arrival order, mirroring
    /// the durable pending queue.
    pending: Vec<(u64, Hash)>,
    next_seq: u64,
    /// Height the next block will carry; inclusion heights are stamped
    /// with this at apply time.
    next_height: Height,
}

impl Ledger {
    /// Open the ledger, creating the chain from `genesis` when the
    /// store is empty. On restart the state tree is rebuilt from the
    /// unspent UTXO table and checked against the latest committed
    /// header; a mismatch is fatal.
    pub fn open(
        storage: Arc<Storage>,
        genesis: &GenesisConfig,
        historical_roots_kept: usize,
    ) -> Result<Self> {
        genesis.validate()?;
        match storage.latest_block()? {
            None => Self::bootstrap(storage, genesis, historical_roots_kept),
            Some(latest) => Self::reopen(storage, genesis, historical_roots_kept, latest),
        }
    }

    fn bootstrap(
        storage: Arc<Storage>,
        genesis: &GenesisConfig,
        retain: usize,
    ) -> Result<Self> {
        let mut tree = VersionedTree::new(retain);
        let mut batch = storage.batch();

        for utxo in genesis.utxo_set()? {
            tree.insert(utxo.utxo_ref().merkle_key(), utxo.merkle_leaf());
            batch.insert_utxo(&utxo)?;
        }

        // the declared allocations must commit to the trusted root the
        // genesis file carries; anything else is a tampered or wrong
        // file and nothing may be written
        let trusted = genesis
            .state_root_hash()
            .expect("validated genesis state root");
        if tree.root() != trusted {
            return Err(LedgerError::GenesisMismatch {
                trusted,
                computed: tree.root(),
            });
        }

        let header = BlockHeader {
            height: 0,
            prev_hash: ZERO_HASH,
            state_root: trusted,
            tx_merkle_root: ZERO_HASH,
            timestamp: genesis.timestamp,
            tx_count: 0,
        };
        batch.insert_block(&BlockRecord::new_local(header.clone(), Vec::new()))?;
        batch.set_var(VAR_PENDING_SEQ, 0);
        storage.commit(batch)?;
        tree.seal(0);

        info!(
            chain_id = %genesis.chain_id,
            utxos = genesis.utxos.len(),
            state_root = %hex::encode(header.state_root),
            "initialised chain from genesis"
        );

        Ok(Self {
            storage,
            tree,
            pending: Vec::new(),
            next_seq: 0,
            next_height: 1,
        })
    }

    fn reopen(
        storage: Arc<Storage>,
        genesis: &GenesisConfig,
        retain: usize,
        latest: BlockRecord,
    ) -> Result<Self> {
        // the genesis allocation must exist under this chain id
        let probe = UtxoRef::new(genesis_txid(&genesis.chain_id), 0);
        if storage.fetch_utxo(&probe)?.is_none() {
            return Err(LedgerError::ChainMismatch);
        }

        // and block 0 must commit to the trusted genesis root
        let trusted = genesis
            .state_root_hash()
            .expect("validated genesis state root");
        let block0 = storage
            .fetch_block(0)?
            .ok_or(LedgerError::ChainMismatch)?;
        if block0.header.state_root != trusted {
            return Err(LedgerError::GenesisMismatch {
                trusted,
                computed: block0.header.state_root,
            });
        }

        let mut pending = storage.pending_queue()?;
        pending.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        let pending_txs: Vec<SignedTransaction> = pending
            .iter()
            .map(|(_, txid)| {
                storage.fetch_transaction(txid)?.ok_or_else(|| {
                    LedgerError::Storage(fontana_storage::StorageError::Corrupt(format!(
                        "pending txid {} missing from transaction table",
                        hex::encode(txid)
                    )))
                })
            })
            .collect::<Result<_>>()?;

        // the UTXO table already carries the effects of pending (applied
        // but unsequenced) transactions; the latest header does not. Roll
        // pending back to check the sealed root, then journal it forward
        // again so historical proofs line up with block heights.
        let mut raw = SparseMerkleTree::from_leaves(
            storage
                .all_unspent()?
                .iter()
                .map(|u| (u.utxo_ref().merkle_key(), u.merkle_leaf())),
        );
        for tx in pending_txs.iter().rev() {
            for (index, _) in tx.outputs.iter().enumerate() {
                raw.remove(&UtxoRef::new(tx.txid, index as u32).merkle_key());
            }
            for input in &tx.inputs {
                let utxo = storage.fetch_utxo(input)?.ok_or_else(|| {
                    LedgerError::Storage(fontana_storage::StorageError::Corrupt(format!(
                        "pending input {input} missing from utxo table"
                    )))
                })?;
                raw.insert(utxo.utxo_ref().merkle_key(), utxo.merkle_leaf());
            }
        }

        if raw.root() != latest.header.state_root {
            return Err(LedgerError::StateDivergence {
                committed: latest.header.state_root,
                recomputed: raw.root(),
            });
        }

        let mut tree = VersionedTree::from_tree(raw, retain);
        tree.seal(latest.header.height);
        for tx in &pending_txs {
            for input in &tx.inputs {
                tree.remove(&input.merkle_key());
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                let utxo = Utxo {
                    txid: tx.txid,
                    index: index as u32,
                    recipient: output.recipient,
                    amount: output.amount,
                    status: UtxoStatus::Unspent,
                    created_in_block: latest.header.height + 1,
                    spent_in_block: None,
                };
                tree.insert(utxo.utxo_ref().merkle_key(), utxo.merkle_leaf());
            }
        }

        let next_seq = storage
            .get_var(VAR_PENDING_SEQ)?
            .unwrap_or_else(|| pending.last().map(|(s, _)| s + 1).unwrap_or(0));

        info!(
            height = latest.header.height,
            pending = pending.len(),
            state_root = %hex::encode(latest.header.state_root),
            "reopened ledger"
        );

        Ok(Self {
            storage,
            tree,
            pending,
            next_seq,
            next_height: latest.header.height + 1,
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Height of the block currently being filled.
    pub fn next_height(&self) -> Height {
        self.next_height
    }

    pub fn get_current_state_root(&self) -> Hash {
        self.tree.root()
    }

    pub fn state_root_at(&self, height: Height) -> Option<Hash> {
        self.tree.root_at(height)
    }

    pub fn get_balance(&self, address: &fontana_types::Address) -> Result<Amount> {
        Ok(self.storage.balance(address)?)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Durable queue sequence numbers of the pending transactions.
    pub fn pending_seqs(&self) -> Vec<u64> {
        self.pending.iter().map(|(seq, _)| *seq).collect()
    }

    /// Applied transactions not yet included in a block, FIFO by
    /// arrival with txid as tie-break.
    pub fn get_unconfirmed_txs(&self) -> Result<Vec<SignedTransaction>> {
        let mut ordered = self.pending.clone();
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut txs = Vec::with_capacity(ordered.len());
        for (_, txid) in ordered {
            let tx = self.storage.fetch_transaction(&txid)?.ok_or_else(|| {
                LedgerError::Storage(fontana_storage::StorageError::Corrupt(format!(
                    "pending txid {} missing from transaction table",
                    hex::encode(txid)
                )))
            })?;
            txs.push(tx);
        }
        Ok(txs)
    }

    /// Validate and atomically apply a signed transaction.
    pub fn apply_transaction(&mut self, tx: &SignedTransaction) -> Result<()> {
        self.apply_internal(tx, |_| Ok(()))
    }

    /// Idempotent deposit processing: synthesise and apply the mint
    /// crediting the recipient, marking the deposit processed in the
    /// same atomic batch.
    pub fn process_deposit_event(&mut self, deposit: &VaultDeposit) -> Result<()> {
        if let Some(existing) = self.storage.fetch_vault_deposit(&deposit.l1_tx_hash)? {
            if existing.processed {
                debug!(l1_tx_hash = %deposit.l1_tx_hash, "deposit already processed");
                return Ok(());
            }
        }

        let txid = mint_txid(&deposit.l1_tx_hash);
        if self.storage.has_transaction(&txid)? {
            // mint landed but the processed flag didn't; repair it
            let mut processed = deposit.clone();
            processed.processed = true;
            let mut batch = self.storage.batch();
            batch.insert_vault_deposit(&processed)?;
            self.storage.commit(batch)?;
            return Ok(());
        }

        let mint = SignedTransaction {
            txid,
            inputs: Vec::new(),
            outputs: vec![fontana_types::TxOutput {
                recipient: deposit.recipient,
                amount: deposit.amount,
            }],
            fee: 0,
            payload_hash: ZERO_HASH,
            sender_pubkey: [0u8; 32],
            signature: [0u8; 64],
            kind: TxKind::Mint,
        };

        let mut processed = deposit.clone();
        processed.processed = true;
        self.apply_internal(&mint, |batch| batch.insert_vault_deposit(&processed))?;

        info!(
            l1_tx_hash = %deposit.l1_tx_hash,
            amount = deposit.amount,
            "minted deposit"
        );
        Ok(())
    }

    /// Apply a burn and record the withdrawal intent in the same batch.
    ///
    /// The withdrawal is anchored to the last sealed state root: that is
    /// the newest commitment the DA layer will carry, and the one the L1
    /// bridge can check the burned inputs against.
    pub fn submit_burn(&mut self, tx: &SignedTransaction, recipient_l1: &str) -> Result<()> {
        if tx.kind != TxKind::Burn {
            return Err(ValidationError::MalformedTransaction(
                "withdrawal requires a burn transaction".into(),
            )
            .into());
        }

        let pre_root = self
            .state_root_at(self.next_height - 1)
            .unwrap_or_else(|| self.tree.root());

        let mut input_total: u128 = 0;
        for input in &tx.inputs {
            if let Some(utxo) = self.storage.fetch_unspent(input)? {
                input_total += utxo.amount as u128;
            }
        }
        let burned = input_total
            .saturating_sub(tx.output_total())
            .saturating_sub(tx.fee as u128) as Amount;

        let withdrawal = VaultWithdrawal {
            burn_txid: tx.txid,
            recipient_l1: recipient_l1.to_string(),
            amount: burned,
            state_root_at_burn: pre_root,
            proof_bundle: None,
            l1_tx_hash: None,
            status: WithdrawalStatus::Pending,
        };

        self.apply_internal(tx, |batch| batch.upsert_vault_withdrawal(&withdrawal))?;

        info!(
            burn_txid = %hex::encode(tx.txid),
            amount = burned,
            recipient_l1,
            "recorded withdrawal intent"
        );
        Ok(())
    }

    /// Mark a withdrawal finalised after the L1 payout. Unknown burns
    /// are a hard error: the vault watcher fed us a confirmation for a
    /// burn this node never made.
    pub fn process_withdrawal_event(&mut self, conf: &WithdrawalConfirmation) -> Result<()> {
        let mut withdrawal = self
            .storage
            .fetch_vault_withdrawal(&conf.burn_txid)?
            .ok_or(LedgerError::UnknownWithdrawal(conf.burn_txid))?;

        withdrawal.status = WithdrawalStatus::Finalised;
        withdrawal.l1_tx_hash = Some(conf.l1_tx_hash.clone());
        self.storage.upsert_vault_withdrawal(&withdrawal)?;

        info!(burn_txid = %hex::encode(conf.burn_txid), "withdrawal finalised");
        Ok(())
    }

    /// Build inclusion proofs for every input burned by `burn_txid`
    /// against the withdrawal's anchored root, and store the bundle.
    pub fn prepare_withdrawal_proofs(&mut self, burn_txid: &Hash) -> Result<WithdrawalProofBundle> {
        let mut withdrawal = self
            .storage
            .fetch_vault_withdrawal(burn_txid)?
            .ok_or(LedgerError::UnknownWithdrawal(*burn_txid))?;
        let tx = self
            .storage
            .fetch_transaction(burn_txid)?
            .ok_or(LedgerError::UnknownWithdrawal(*burn_txid))?;

        let mut proofs = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let utxo = self
                .storage
                .fetch_utxo(input)?
                .ok_or(LedgerError::UnprovableInput(*input))?;
            let proof = self.generate_utxo_proof(input, &withdrawal.state_root_at_burn)?;
            if proof.leaf != Some(utxo.merkle_leaf()) {
                return Err(LedgerError::UnprovableInput(*input));
            }
            proofs.push(UtxoInclusionProof { utxo, proof });
        }

        let bundle = WithdrawalProofBundle {
            state_root: withdrawal.state_root_at_burn,
            proofs,
        };
        withdrawal.proof_bundle = Some(bundle.clone());
        if withdrawal.status == WithdrawalStatus::Pending {
            withdrawal.status = WithdrawalStatus::ProofReady;
        }
        self.storage.upsert_vault_withdrawal(&withdrawal)?;
        Ok(bundle)
    }

    /// Inclusion/exclusion proof for a UTXO against a retained root.
    pub fn generate_utxo_proof(&self, utxo_ref: &UtxoRef, at_root: &Hash) -> Result<MerkleProof> {
        Ok(self.tree.prove_at(&utxo_ref.merkle_key(), at_root)?)
    }

    /// Header for the block closing at `next_height` over the current
    /// pending set. Pure computation; persisting is the caller's job.
    pub fn build_header(&self, prev: &BlockHeader, timestamp: u64) -> Result<(BlockHeader, Vec<Hash>)> {
        let txs = self.get_unconfirmed_txs()?;
        let txids: Vec<Hash> = txs.iter().map(|t| t.txid).collect();
        let header = BlockHeader {
            height: prev.height + 1,
            prev_hash: prev.hash(),
            state_root: self.tree.root(),
            tx_merkle_root: tx_merkle_root(&txids),
            timestamp,
            tx_count: txids.len() as u32,
        };
        Ok((header, txids))
    }

    /// Seal the tree at `height` and clear the pending set after the
    /// block has been durably committed.
    pub fn complete_block(&mut self, height: Height) {
        if height != self.next_height {
            warn!(
                expected = self.next_height,
                got = height,
                "complete_block height out of sequence"
            );
        }
        self.tree.seal(height);
        self.pending.clear();
        self.next_height = height + 1;
    }

    /// Recompute the state root straight from the UTXO table. Test and
    /// audit hook; the live tree must always agree.
    pub fn recompute_root_from_storage(&self) -> Result<Hash> {
        let rebuilt = SparseMerkleTree::from_leaves(
            self.storage
                .all_unspent()?
                .iter()
                .map(|u| (u.utxo_ref().merkle_key(), u.merkle_leaf())),
        );
        Ok(rebuilt.root())
    }

    // ===== VALIDATION & APPLY =====

    fn apply_internal<F>(&mut self, tx: &SignedTransaction, extra: F) -> Result<()>
    where
        F: FnOnce(&mut WriteBatch) -> std::result::Result<(), fontana_storage::StorageError>,
    {
        self.validate_structure(tx)?;
        self.validate_signature(tx)?;
        let inputs = self.validate_inputs(tx)?;
        validate_conservation(tx, &inputs)?;

        let height = self.next_height;
        let mut batch = self.storage.batch();

        for utxo in &inputs {
            batch.mark_utxo_spent(utxo, height)?;
        }

        let mut created = Vec::with_capacity(tx.outputs.len());
        for (index, output) in tx.outputs.iter().enumerate() {
            let utxo = Utxo {
                txid: tx.txid,
                index: index as u32,
                recipient: output.recipient,
                amount: output.amount,
                status: UtxoStatus::Unspent,
                created_in_block: height,
                spent_in_block: None,
            };
            batch.insert_utxo(&utxo)?;
            created.push(utxo);
        }

        batch.insert_transaction(tx)?;
        let seq = self.next_seq;
        batch.queue_pending(seq, &tx.txid);
        batch.set_var(VAR_PENDING_SEQ, seq + 1);
        extra(&mut batch)?;

        // the batch is all-or-nothing; the tree is only touched after
        // the commit lands, so a storage failure leaves both unchanged
        self.storage.commit(batch)?;

        for utxo in &inputs {
            self.tree.remove(&utxo.utxo_ref().merkle_key());
        }
        for utxo in &created {
            self.tree.insert(utxo.utxo_ref().merkle_key(), utxo.merkle_leaf());
        }
        self.pending.push((seq, tx.txid));
        self.next_seq = seq + 1;

        debug!(txid = %hex::encode(tx.txid), kind = ?tx.kind, "applied transaction");
        Ok(())
    }

    fn validate_structure(&self, tx: &SignedTransaction) -> std::result::Result<(), ValidationError> {
        match tx.kind {
            TxKind::Transfer => {
                if tx.inputs.is_empty() {
                    return Err(ValidationError::MalformedTransaction(
                        "transfer has no inputs".into(),
                    ));
                }
                if tx.outputs.is_empty() {
                    return Err(ValidationError::MalformedTransaction(
                        "transfer has no outputs".into(),
                    ));
                }
            }
            TxKind::Mint => {
                if !tx.inputs.is_empty() {
                    return Err(ValidationError::MalformedTransaction(
                        "mint must not spend inputs".into(),
                    ));
                }
                if tx.fee != 0 {
                    return Err(ValidationError::MalformedTransaction(
                        "mint must carry no fee".into(),
                    ));
                }
                if tx.outputs.is_empty() {
                    return Err(ValidationError::MalformedTransaction(
                        "mint has no outputs".into(),
                    ));
                }
            }
            TxKind::Burn => {
                if tx.inputs.is_empty() {
                    return Err(ValidationError::MalformedTransaction(
                        "burn has no inputs".into(),
                    ));
                }
                if tx.outputs.len() > 1 {
                    return Err(ValidationError::MalformedTransaction(
                        "burn may carry at most one change output".into(),
                    ));
                }
            }
        }

        if tx.outputs.iter().any(|o| o.amount == 0) {
            return Err(ValidationError::MalformedTransaction(
                "zero-amount output".into(),
            ));
        }

        let mut seen = tx.inputs.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != tx.inputs.len() {
            return Err(ValidationError::MalformedTransaction(
                "duplicate input".into(),
            ));
        }

        // mint txids are domain-separated over the L1 deposit hash, not
        // the canonical field hash
        if tx.kind != TxKind::Mint && tx.txid != tx.compute_txid() {
            return Err(ValidationError::MalformedTransaction(
                "txid does not match canonical encoding".into(),
            ));
        }

        Ok(())
    }

    fn validate_signature(&self, tx: &SignedTransaction) -> std::result::Result<(), ValidationError> {
        if tx.kind == TxKind::Mint {
            return Ok(());
        }
        let verifying_key = VerifyingKey::from_bytes(&tx.sender_pubkey)
            .map_err(|_| ValidationError::InvalidSignature)?;
        let signature = DalekSignature::from_bytes(&tx.signature);
        verifying_key
            .verify_strict(&tx.signing_message(), &signature)
            .map_err(|_| ValidationError::InvalidSignature)
    }

    fn validate_inputs(&self, tx: &SignedTransaction) -> Result<Vec<Utxo>> {
        if self.storage.has_transaction(&tx.txid)? {
            return Err(ValidationError::MalformedTransaction(
                "transaction already applied".into(),
            )
            .into());
        }

        let sender = tx.sender_address();
        let mut resolved = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let utxo = match self.storage.fetch_utxo(input)? {
                None => return Err(ValidationError::InputNotFound(*input).into()),
                Some(u) if !u.is_unspent() => {
                    return Err(ValidationError::InputAlreadySpent(*input).into())
                }
                Some(u) => u,
            };
            if utxo.recipient != sender {
                return Err(ValidationError::MalformedTransaction(format!(
                    "input {input} is not owned by the sender"
                ))
                .into());
            }
            resolved.push(utxo);
        }
        Ok(resolved)
    }
}

fn validate_conservation(
    tx: &SignedTransaction,
    inputs: &[Utxo],
) -> std::result::Result<(), ValidationError> {
    let input_total: u128 = inputs.iter().map(|u| u.amount as u128).sum();
    let output_total = tx.output_total();
    let fee = tx.fee as u128;

    match tx.kind {
        TxKind::Transfer => {
            if input_total != output_total + fee {
                return Err(ValidationError::ConservationViolation {
                    inputs: input_total,
                    outputs: output_total,
                    fee: tx.fee,
                });
            }
        }
        TxKind::Mint => {}
        TxKind::Burn => {
            if output_total + fee > input_total {
                return Err(ValidationError::InsufficientFunds {
                    have: input_total,
                    need: output_total + fee,
                });
            }
            if output_total + fee == input_total {
                return Err(ValidationError::MalformedTransaction(
                    "burn leaves nothing to withdraw".into(),
                ));
            }
        }
    }
    Ok(())
}
