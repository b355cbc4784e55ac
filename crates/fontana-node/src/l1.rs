//! L1 vault client and poll-based watcher.
//!
//! The settlement-layer wire is behind [`L1Client`]; the watcher scans
//! `(watermark, head]` for vault deposits and withdrawal finalisations,
//! pushes them through the writer mailbox, and only advances the
//! watermark once the writer has durably applied them.

use crate::node::NodeMsg;
use fontana_storage::{Storage, VAR_LAST_L1_HEIGHT};
use fontana_types::{VaultDeposit, WithdrawalConfirmation};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum L1Error {
    #[error("l1 rpc: {0}")]
    Rpc(String),
    #[error("l1 returned malformed data: {0}")]
    Malformed(String),
}

#[async_trait::async_trait]
pub trait L1Client: Send + Sync {
    async fn latest_height(&self) -> Result<u64, L1Error>;

    async fn deposits_in_range(
        &self,
        vault_address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<VaultDeposit>, L1Error>;

    async fn confirmations_in_range(
        &self,
        vault_address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<WithdrawalConfirmation>, L1Error>;
}

// ===== HTTP CLIENT =====

pub struct HttpL1Client {
    url: String,
    client: Client,
}

impl HttpL1Client {
    pub fn new(url: &str) -> Result<Self, L1Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| L1Error::Rpc(format!("http client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, L1Error> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "fontana",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| L1Error::Rpc(e.to_string()))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| L1Error::Rpc(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(L1Error::Rpc(format!("{}: {}", err.code, err.message)));
        }
        body.result
            .ok_or_else(|| L1Error::Rpc("empty result".into()))
    }
}

#[async_trait::async_trait]
impl L1Client for HttpL1Client {
    async fn latest_height(&self) -> Result<u64, L1Error> {
        let result = self.call("vault.LatestHeight", vec![]).await?;
        serde_json::from_value(result).map_err(|e| L1Error::Malformed(e.to_string()))
    }

    async fn deposits_in_range(
        &self,
        vault_address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<VaultDeposit>, L1Error> {
        let result = self
            .call(
                "vault.Deposits",
                vec![json!(vault_address), json!(from), json!(to)],
            )
            .await?;
        let raw: Vec<RawDeposit> =
            serde_json::from_value(result).map_err(|e| L1Error::Malformed(e.to_string()))?;
        raw.into_iter().map(RawDeposit::into_deposit).collect()
    }

    async fn confirmations_in_range(
        &self,
        vault_address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<WithdrawalConfirmation>, L1Error> {
        let result = self
            .call(
                "vault.Finalisations",
                vec![json!(vault_address), json!(from), json!(to)],
            )
            .await?;
        let raw: Vec<RawConfirmation> =
            serde_json::from_value(result).map_err(|e| L1Error::Malformed(e.to_string()))?;
        raw.into_iter()
            .map(RawConfirmation::into_confirmation)
            .collect()
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RawDeposit {
    l1_tx_hash: String,
    /// hex-encoded rollup address
    recipient: String,
    amount: u64,
    l1_height: u64,
}

impl RawDeposit {
    fn into_deposit(self) -> Result<VaultDeposit, L1Error> {
        let recipient = hex::decode(&self.recipient)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| L1Error::Malformed(format!("bad recipient {:?}", self.recipient)))?;
        Ok(VaultDeposit {
            l1_tx_hash: self.l1_tx_hash,
            recipient,
            amount: self.amount,
            l1_height: self.l1_height,
            processed: false,
        })
    }
}

#[derive(Deserialize)]
struct RawConfirmation {
    burn_txid: String,
    l1_tx_hash: String,
}

impl RawConfirmation {
    fn into_confirmation(self) -> Result<WithdrawalConfirmation, L1Error> {
        let burn_txid = hex::decode(&self.burn_txid)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| L1Error::Malformed(format!("bad burn txid {:?}", self.burn_txid)))?;
        Ok(WithdrawalConfirmation {
            burn_txid,
            l1_tx_hash: self.l1_tx_hash,
        })
    }
}

// ===== IN-MEMORY CLIENT =====

/// Scriptable L1 for tests and local runs.
#[derive(Default)]
pub struct MemoryL1 {
    inner: std::sync::Mutex<MemoryL1Inner>,
}

#[derive(Default)]
struct MemoryL1Inner {
    height: u64,
    deposits: Vec<VaultDeposit>,
    confirmations: Vec<(u64, WithdrawalConfirmation)>,
}

impl MemoryL1 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_deposit(&self, deposit: VaultDeposit) {
        let mut inner = self.inner.lock().expect("l1 lock");
        inner.height = inner.height.max(deposit.l1_height);
        inner.deposits.push(deposit);
    }

    pub fn push_confirmation(&self, at_height: u64, conf: WithdrawalConfirmation) {
        let mut inner = self.inner.lock().expect("l1 lock");
        inner.height = inner.height.max(at_height);
        inner.confirmations.push((at_height, conf));
    }

    pub fn set_height(&self, height: u64) {
        self.inner.lock().expect("l1 lock").height = height;
    }
}

#[async_trait::async_trait]
impl L1Client for MemoryL1 {
    async fn latest_height(&self) -> Result<u64, L1Error> {
        Ok(self.inner.lock().expect("l1 lock").height)
    }

    async fn deposits_in_range(
        &self,
        _vault_address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<VaultDeposit>, L1Error> {
        Ok(self
            .inner
            .lock()
            .expect("l1 lock")
            .deposits
            .iter()
            .filter(|d| d.l1_height >= from && d.l1_height <= to)
            .cloned()
            .collect())
    }

    async fn confirmations_in_range(
        &self,
        _vault_address: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<WithdrawalConfirmation>, L1Error> {
        Ok(self
            .inner
            .lock()
            .expect("l1 lock")
            .confirmations
            .iter()
            .filter(|(h, _)| *h >= from && *h <= to)
            .map(|(_, c)| c.clone())
            .collect())
    }
}

// ===== WATCHER =====

pub struct VaultWatcher<C: L1Client> {
    client: C,
    vault_address: String,
    poll_interval: Duration,
    storage: Arc<Storage>,
    mailbox: mpsc::Sender<NodeMsg>,
}

impl<C: L1Client> VaultWatcher<C> {
    pub fn new(
        client: C,
        vault_address: String,
        poll_interval: Duration,
        storage: Arc<Storage>,
        mailbox: mpsc::Sender<NodeMsg>,
    ) -> Self {
        Self {
            client,
            vault_address,
            poll_interval,
            storage,
            mailbox,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(vault = %self.vault_address, "vault watcher started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if let Err(e) = self.scan_once().await {
                warn!("vault scan failed: {e}");
            }
        }
        info!("vault watcher stopped");
    }

    /// One scan of `(watermark, head]`. The watermark only advances
    /// after every event in the window has been applied by the writer.
    pub async fn scan_once(&self) -> Result<(), L1Error> {
        let head = self.client.latest_height().await?;
        let from = self
            .storage
            .get_var(VAR_LAST_L1_HEIGHT)
            .map_err(|e| L1Error::Rpc(e.to_string()))?
            .unwrap_or(0);
        if head <= from {
            return Ok(());
        }

        let deposits = self
            .client
            .deposits_in_range(&self.vault_address, from + 1, head)
            .await?;
        for deposit in deposits {
            debug!(l1_tx_hash = %deposit.l1_tx_hash, "forwarding deposit");
            let (reply, done) = oneshot::channel();
            let msg = NodeMsg::DepositReceived {
                deposit,
                reply: Some(reply),
            };
            if self.mailbox.send(msg).await.is_err() {
                return Err(L1Error::Rpc("writer mailbox closed".into()));
            }
            match done.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("deposit rejected by writer: {e}"),
                Err(_) => return Err(L1Error::Rpc("writer dropped reply".into())),
            }
        }

        let confirmations = self
            .client
            .confirmations_in_range(&self.vault_address, from + 1, head)
            .await?;
        for conf in confirmations {
            let (reply, done) = oneshot::channel();
            let msg = NodeMsg::WithdrawalConfirmed {
                conf,
                reply: Some(reply),
            };
            if self.mailbox.send(msg).await.is_err() {
                return Err(L1Error::Rpc("writer mailbox closed".into()));
            }
            match done.await {
                Ok(Ok(())) => {}
                // unknown burn is a state bug, not a reason to stall the scan
                Ok(Err(e)) => error!("withdrawal confirmation rejected: {e}"),
                Err(_) => return Err(L1Error::Rpc("writer dropped reply".into())),
            }
        }

        self.storage
            .set_var(VAR_LAST_L1_HEIGHT, head)
            .map_err(|e| L1Error::Rpc(e.to_string()))?;
        Ok(())
    }
}
