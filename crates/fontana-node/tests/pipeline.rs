//! End-to-end pipeline tests: sequencing, DA posting, bridge flow, and
//! recovery by replay, all against the in-memory DA and L1 backends.

use ed25519_dalek::{Signer, SigningKey};
use fontana_da::{parse_namespace_base, DaClient, MemoryDa, Namespace};
use fontana_ledger::Ledger;
use fontana_node::{
    bridge, recover, ChainStatus, MemoryL1, Node, NodeMsg, Sequencer, VaultWatcher,
};
use fontana_storage::{Storage, VAR_LAST_L1_HEIGHT};
use fontana_types::{
    genesis_txid, Amount, GenesisConfig, GenesisUtxo, SignedTransaction, TxKind, TxOutput,
    UtxoRef, VaultDeposit, ZERO_HASH,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

const CHAIN_ID: &str = "fontana-test";

fn signer(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

fn address_of(key: &SigningKey) -> fontana_types::Address {
    fontana_types::address_from_pubkey(&key.verifying_key().to_bytes())
}

fn genesis_for(key: &SigningKey, amount: Amount) -> GenesisConfig {
    let mut genesis = GenesisConfig {
        chain_id: CHAIN_ID.into(),
        timestamp: 1_700_000_000,
        state_root: String::new(),
        utxos: vec![GenesisUtxo {
            recipient: hex::encode(address_of(key)),
            amount,
        }],
    };
    genesis.state_root = hex::encode(genesis.compute_state_root().unwrap());
    genesis
}

fn build_tx(
    key: &SigningKey,
    inputs: Vec<UtxoRef>,
    outputs: Vec<TxOutput>,
    fee: Amount,
    kind: TxKind,
) -> SignedTransaction {
    let mut tx = SignedTransaction {
        txid: ZERO_HASH,
        inputs,
        outputs,
        fee,
        payload_hash: [0xAB; 32],
        sender_pubkey: key.verifying_key().to_bytes(),
        signature: [0u8; 64],
        kind,
    };
    tx.txid = tx.compute_txid();
    tx.signature = key.sign(&tx.signing_message()).to_bytes();
    tx
}

fn namespace_base() -> Namespace {
    parse_namespace_base("00112233aabbccdd").unwrap()
}

fn sequencer() -> Sequencer {
    Sequencer::new(Duration::from_secs(6), None)
}

fn poster(da: &Arc<MemoryDa>, storage: &Arc<Storage>) -> fontana_node::DaPoster<MemoryDa> {
    fontana_node::DaPoster::new(
        da.clone(),
        storage.clone(),
        namespace_base(),
        Duration::from_millis(10),
    )
}

#[tokio::test]
async fn empty_block_cadence_and_da_posting() {
    let alice = signer(1);
    let genesis = genesis_for(&alice, 100);
    let storage = Arc::new(Storage::open_temporary().unwrap());
    let mut ledger = Ledger::open(storage.clone(), &genesis, 16).unwrap();
    let genesis_root = ledger.get_current_state_root();

    let record = sequencer().build_block(&mut ledger).unwrap();
    assert_eq!(record.header.height, 1);
    assert_eq!(record.header.tx_count, 0);
    assert_eq!(record.header.state_root, genesis_root);
    assert!(record.local_committed);
    assert!(!record.da_committed);

    let prev = storage.fetch_block(0).unwrap().unwrap();
    assert_eq!(record.header.prev_hash, prev.header.hash());

    // the empty block is still posted
    let da = Arc::new(MemoryDa::new());
    let posted = poster(&da, &storage).post_ready().await.unwrap();
    assert_eq!(posted, 2); // genesis + block 1

    let block1 = storage.fetch_block(1).unwrap().unwrap();
    assert!(block1.da_committed);
    assert!(block1.blob_ref.as_deref().unwrap().starts_with("da:"));
    assert!(storage.uncommitted_blocks().unwrap().is_empty());
}

#[tokio::test]
async fn poster_retries_transiently_and_keeps_height_order() {
    let alice = signer(1);
    let genesis = genesis_for(&alice, 100);
    let storage = Arc::new(Storage::open_temporary().unwrap());
    let mut ledger = Ledger::open(storage.clone(), &genesis, 16).unwrap();

    for _ in 0..3 {
        sequencer().build_block(&mut ledger).unwrap();
    }

    let da = Arc::new(MemoryDa::new());
    da.fail_next_submits(1);

    let poster = poster(&da, &storage);
    let err = poster.post_ready().await.unwrap_err();
    assert!(err.is_transient());
    // nothing advanced past the failure
    assert_eq!(storage.uncommitted_blocks().unwrap().len(), 4);
    assert_eq!(da.blob_count(), 0);

    let posted = poster.post_ready().await.unwrap();
    assert_eq!(posted, 4);
    for height in 0..=3u64 {
        assert!(storage.fetch_block(height).unwrap().unwrap().da_committed);
    }
}

#[tokio::test]
async fn recovery_replays_to_identical_state() {
    let alice = signer(1);
    let bob = signer(2);
    let genesis = genesis_for(&alice, 1_000);
    let storage1 = Arc::new(Storage::open_temporary().unwrap());
    let mut ledger1 = Ledger::open(storage1.clone(), &genesis, 16).unwrap();
    let seq = sequencer();

    // block 1: a payment
    let g1 = UtxoRef::new(genesis_txid(CHAIN_ID), 0);
    let t1 = build_tx(
        &alice,
        vec![g1],
        vec![
            TxOutput {
                recipient: address_of(&bob),
                amount: 600,
            },
            TxOutput {
                recipient: address_of(&alice),
                amount: 399,
            },
        ],
        1,
        TxKind::Transfer,
    );
    ledger1.apply_transaction(&t1).unwrap();
    seq.build_block(&mut ledger1).unwrap();

    // block 2: empty
    seq.build_block(&mut ledger1).unwrap();

    // block 3: a bridge mint and a burn
    bridge::handle_deposit_received(
        &mut ledger1,
        &VaultDeposit {
            l1_tx_hash: "0xdeposit1".into(),
            recipient: address_of(&bob),
            amount: 250,
            l1_height: 10,
            processed: false,
        },
    )
    .unwrap();
    let burn = build_tx(
        &bob,
        vec![UtxoRef::new(t1.txid, 0)],
        vec![TxOutput {
            recipient: address_of(&bob),
            amount: 100,
        }],
        0,
        TxKind::Burn,
    );
    ledger1.submit_burn(&burn, "tia1recipient").unwrap();
    seq.build_block(&mut ledger1).unwrap();

    // ship everything to DA
    let da = Arc::new(MemoryDa::new());
    poster(&da, &storage1).post_ready().await.unwrap();

    // rebuild a second node from the DA contents alone
    let storage2 = Arc::new(Storage::open_temporary().unwrap());
    let ledger2 = recover(&*da, &namespace_base(), &genesis, storage2.clone(), 16)
        .await
        .unwrap();

    assert_eq!(
        ledger2.get_current_state_root(),
        ledger1.get_current_state_root()
    );
    assert_eq!(ledger2.next_height(), ledger1.next_height());

    for height in 0..=3u64 {
        let b1 = storage1.fetch_block(height).unwrap().unwrap();
        let b2 = storage2.fetch_block(height).unwrap().unwrap();
        assert_eq!(b1.header, b2.header);
        assert_eq!(b1.txids, b2.txids);
        assert!(b2.da_committed);
    }

    let mut set1 = storage1.all_unspent().unwrap();
    let mut set2 = storage2.all_unspent().unwrap();
    set1.sort_by_key(|u| (u.txid, u.index));
    set2.sort_by_key(|u| (u.txid, u.index));
    assert_eq!(set1, set2);

    assert_eq!(ledger2.get_balance(&address_of(&bob)).unwrap(), 350);

    // recovery is idempotent: running again on the same store is a no-op
    let ledger3 = recover(&*da, &namespace_base(), &genesis, storage2, 16)
        .await
        .unwrap();
    assert_eq!(
        ledger3.get_current_state_root(),
        ledger1.get_current_state_root()
    );
}

#[tokio::test]
async fn recovery_rejects_tampered_genesis() {
    let alice = signer(1);
    let mut genesis = genesis_for(&alice, 100);
    genesis.state_root = hex::encode([9u8; 32]);

    let da = Arc::new(MemoryDa::new());
    let storage = Arc::new(Storage::open_temporary().unwrap());
    let err = recover(&*da, &namespace_base(), &genesis, storage, 16)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        fontana_node::RecoveryError::Ledger(
            fontana_ledger::LedgerError::GenesisMismatch { .. }
        )
    ));
}

#[tokio::test]
async fn recovery_halts_on_chain_discontinuity() {
    let alice = signer(1);
    let genesis = genesis_for(&alice, 100);
    let da = Arc::new(MemoryDa::new());

    // a block 1 that does not chain onto this genesis
    let bogus = fontana_types::Block {
        header: fontana_types::BlockHeader {
            height: 1,
            prev_hash: [9u8; 32],
            state_root: [8u8; 32],
            tx_merkle_root: ZERO_HASH,
            timestamp: 1_700_000_100,
            tx_count: 0,
        },
        transactions: vec![],
    };
    let bytes = fontana_types::encode_block(&bogus).unwrap();
    da.submit_blob(fontana_da::derive_namespace(&namespace_base(), 1), bytes)
        .await
        .unwrap();

    let storage = Arc::new(Storage::open_temporary().unwrap());
    let err = recover(&*da, &namespace_base(), &genesis, storage, 16)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        fontana_node::RecoveryError::ChainDiscontinuity(1)
    ));
}

#[tokio::test]
async fn writer_applies_and_sequences_submitted_transactions() {
    let alice = signer(1);
    let bob = signer(2);
    let genesis = genesis_for(&alice, 100);
    let storage = Arc::new(Storage::open_temporary().unwrap());
    let ledger = Ledger::open(storage.clone(), &genesis, 16).unwrap();

    let (node, handle) = Node::new(
        ledger,
        Sequencer::new(Duration::from_millis(50), None),
        16,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = tokio::spawn(node.run(shutdown_rx));

    let g1 = UtxoRef::new(genesis_txid(CHAIN_ID), 0);
    let tx = build_tx(
        &alice,
        vec![g1],
        vec![TxOutput {
            recipient: address_of(&bob),
            amount: 100,
        }],
        0,
        TxKind::Transfer,
    );

    let txid = tx.txid;
    let (reply, done) = oneshot::channel();
    handle
        .mailbox
        .send(NodeMsg::SubmitTransaction { tx, reply })
        .await
        .unwrap();
    let receipt = done.await.unwrap().unwrap();
    assert_eq!(receipt.txid, txid);

    // wait for the tick to seal the receipt's block
    let mut status = handle.status.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current: ChainStatus = *status.borrow_and_update();
            if current.height >= receipt.block_height {
                return;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let sealed = storage
        .fetch_block(receipt.block_height)
        .unwrap()
        .unwrap();
    assert_eq!(sealed.header.tx_count, 1);
    assert!(sealed.txids.contains(&txid));
    assert_eq!(storage.balance(&address_of(&bob)).unwrap(), 100);

    shutdown_tx.send(true).unwrap();
    writer.await.unwrap();
}

#[tokio::test]
async fn max_batch_triggers_early_block() {
    let alice = signer(1);
    let bob = signer(2);
    let genesis = genesis_for(&alice, 100);
    let storage = Arc::new(Storage::open_temporary().unwrap());
    let ledger = Ledger::open(storage.clone(), &genesis, 16).unwrap();

    // interval far beyond the test timeout; only the size trigger can fire
    let (node, handle) = Node::new(
        ledger,
        Sequencer::new(Duration::from_secs(600), Some(1)),
        16,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = tokio::spawn(node.run(shutdown_rx));

    let g1 = UtxoRef::new(genesis_txid(CHAIN_ID), 0);
    let tx = build_tx(
        &alice,
        vec![g1],
        vec![TxOutput {
            recipient: address_of(&bob),
            amount: 100,
        }],
        0,
        TxKind::Transfer,
    );
    let (reply, done) = oneshot::channel();
    handle
        .mailbox
        .send(NodeMsg::SubmitTransaction { tx, reply })
        .await
        .unwrap();
    done.await.unwrap().unwrap();

    let mut status = handle.status.clone();
    tokio::time::timeout(Duration::from_secs(5), status.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.borrow().height, 1);
    assert_eq!(storage.fetch_block(1).unwrap().unwrap().header.tx_count, 1);

    shutdown_tx.send(true).unwrap();
    writer.await.unwrap();
}

#[tokio::test]
async fn vault_watcher_forwards_deposits_once() {
    let alice = signer(1);
    let genesis = genesis_for(&alice, 10);
    let storage = Arc::new(Storage::open_temporary().unwrap());
    let ledger = Ledger::open(storage.clone(), &genesis, 16).unwrap();

    let (node, handle) = Node::new(
        ledger,
        Sequencer::new(Duration::from_secs(600), None),
        16,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = tokio::spawn(node.run(shutdown_rx));

    let l1 = MemoryL1::new();
    // the same deposit surfaces twice on L1 (a rescan); minting stays single
    l1.push_deposit(VaultDeposit {
        l1_tx_hash: "0xDEAD".into(),
        recipient: address_of(&alice),
        amount: 50,
        l1_height: 3,
        processed: false,
    });
    l1.push_deposit(VaultDeposit {
        l1_tx_hash: "0xDEAD".into(),
        recipient: address_of(&alice),
        amount: 50,
        l1_height: 4,
        processed: false,
    });

    let watcher = VaultWatcher::new(
        l1,
        "tia1vault".into(),
        Duration::from_millis(10),
        storage.clone(),
        handle.mailbox.clone(),
    );
    watcher.scan_once().await.unwrap();

    assert_eq!(storage.balance(&address_of(&alice)).unwrap(), 60);
    assert_eq!(storage.get_var(VAR_LAST_L1_HEIGHT).unwrap(), Some(4));
    let deposit = storage.fetch_vault_deposit("0xDEAD").unwrap().unwrap();
    assert!(deposit.processed);

    // a later scan with no new heights is a no-op
    watcher.scan_once().await.unwrap();
    assert_eq!(storage.balance(&address_of(&alice)).unwrap(), 60);

    shutdown_tx.send(true).unwrap();
    writer.await.unwrap();
}
