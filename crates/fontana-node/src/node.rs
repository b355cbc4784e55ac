//! The single-writer core.
//!
//! One task owns the ledger (and with it the state tree and all ledger
//! writes). Ingress - HTTP handlers and the vault watcher - talks to it
//! over a bounded mailbox, which reifies ordering and gives natural
//! backpressure. The sequencer tick runs inside the same loop, so
//! heights are monotonic and every block's state root is the root
//! observed right after its transactions applied.
//!
//! The DA poster is the one component outside this loop; it only flips
//! `da_committed`/`blob_ref` on already-committed blocks.

use crate::bridge;
use crate::sequencer::Sequencer;
use fontana_ledger::{Ledger, LedgerError};
use fontana_types::{
    Hash, Height, SignedTransaction, VaultDeposit, WithdrawalConfirmation,
    WithdrawalProofBundle,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Receipt for an accepted transaction: it is applied and will be
/// carried by the locally committed block at `block_height`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub txid: Hash,
    pub block_height: Height,
}

/// Latest sealed height and root, published by the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainStatus {
    pub height: Height,
    pub state_root: Hash,
}

pub enum NodeMsg {
    SubmitTransaction {
        tx: SignedTransaction,
        reply: oneshot::Sender<Result<TxReceipt, LedgerError>>,
    },
    SubmitBurn {
        tx: SignedTransaction,
        recipient_l1: String,
        reply: oneshot::Sender<Result<TxReceipt, LedgerError>>,
    },
    DepositReceived {
        deposit: VaultDeposit,
        reply: Option<oneshot::Sender<Result<(), bridge::BridgeError>>>,
    },
    WithdrawalConfirmed {
        conf: WithdrawalConfirmation,
        reply: Option<oneshot::Sender<Result<(), bridge::BridgeError>>>,
    },
    PrepareWithdrawalProofs {
        burn_txid: Hash,
        reply: oneshot::Sender<Result<WithdrawalProofBundle, bridge::BridgeError>>,
    },
}

/// Cheap handle for ingress tasks.
#[derive(Clone)]
pub struct NodeHandle {
    pub mailbox: mpsc::Sender<NodeMsg>,
    pub status: watch::Receiver<ChainStatus>,
}

pub struct Node {
    ledger: Ledger,
    sequencer: Sequencer,
    mailbox: mpsc::Receiver<NodeMsg>,
    status_tx: watch::Sender<ChainStatus>,
}

impl Node {
    pub fn new(
        ledger: Ledger,
        sequencer: Sequencer,
        mailbox_capacity: usize,
    ) -> (Self, NodeHandle) {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(mailbox_capacity);
        let status = ChainStatus {
            height: ledger.next_height() - 1,
            state_root: ledger.get_current_state_root(),
        };
        let (status_tx, status_rx) = watch::channel(status);

        let node = Self {
            ledger,
            sequencer,
            mailbox: mailbox_rx,
            status_tx,
        };
        let handle = NodeHandle {
            mailbox: mailbox_tx,
            status: status_rx,
        };
        (node, handle)
    }

    /// Writer loop. Exits once shutdown is signalled (after draining
    /// the mailbox) or every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.sequencer.block_interval,
            self.sequencer.block_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.sequencer.block_interval.as_secs(),
            "writer started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.drain();
                    break;
                }
                _ = ticker.tick() => {
                    self.produce_block();
                }
                msg = self.mailbox.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                    if self.sequencer.batch_full(self.ledger.pending_count()) {
                        self.produce_block();
                        ticker.reset();
                    }
                }
            }
        }

        info!("writer stopped");
    }

    /// Apply whatever is already queued, then stop. In-flight senders
    /// get their replies; new sends fail once the mailbox drops.
    fn drain(&mut self) {
        while let Ok(msg) = self.mailbox.try_recv() {
            self.handle(msg);
        }
        if self.ledger.pending_count() > 0 {
            self.produce_block();
        }
    }

    fn handle(&mut self, msg: NodeMsg) {
        match msg {
            NodeMsg::SubmitTransaction { tx, reply } => {
                let result = self
                    .ledger
                    .apply_transaction(&tx)
                    .map(|_| self.receipt(tx.txid));
                let _ = reply.send(result);
            }
            NodeMsg::SubmitBurn {
                tx,
                recipient_l1,
                reply,
            } => {
                let result = self
                    .ledger
                    .submit_burn(&tx, &recipient_l1)
                    .map(|_| self.receipt(tx.txid));
                let _ = reply.send(result);
            }
            NodeMsg::DepositReceived { deposit, reply } => {
                let result = bridge::handle_deposit_received(&mut self.ledger, &deposit);
                if let Err(e) = &result {
                    error!(l1_tx_hash = %deposit.l1_tx_hash, "deposit failed: {e}");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            NodeMsg::WithdrawalConfirmed { conf, reply } => {
                let result = bridge::handle_withdrawal_confirmed(&mut self.ledger, &conf);
                if let Err(e) = &result {
                    error!("withdrawal confirmation failed: {e}");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            NodeMsg::PrepareWithdrawalProofs { burn_txid, reply } => {
                let result = bridge::prepare_withdrawal_proofs(&mut self.ledger, &burn_txid);
                let _ = reply.send(result);
            }
        }
    }

    fn receipt(&self, txid: Hash) -> TxReceipt {
        TxReceipt {
            txid,
            block_height: self.ledger.next_height(),
        }
    }

    fn produce_block(&mut self) {
        match self.sequencer.build_block(&mut self.ledger) {
            Ok(record) => {
                self.status_tx.send_replace(ChainStatus {
                    height: record.header.height,
                    state_root: record.header.state_root,
                });
            }
            Err(e) => {
                // a failed production leaves pending intact; the next
                // tick retries
                error!("block production failed: {e}");
            }
        }
    }
}
