//! HTTP API: transaction ingest plus read-only chain queries.
//!
//! Thin transport only - handlers forward writes into the writer
//! mailbox and read queries straight from storage or the published
//! chain status. Mints never enter here (the bridge synthesises them)
//! and burns come in through `/withdraw` with their L1 recipient.

use crate::node::{ChainStatus, NodeHandle, NodeMsg, TxReceipt};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fontana_ledger::{LedgerError, ValidationError};
use fontana_storage::Storage;
use fontana_types::{Height, SignedTransaction, TxKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct ApiState {
    pub handle: NodeHandle,
    pub storage: Arc<Storage>,
    /// DA-side finality depth clients should wait for before treating a
    /// blob reference as final.
    pub da_confirmation_blocks: u64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/head", get(head))
        .route("/state-root", get(state_root))
        .route("/block/{height}", get(get_block))
        .route("/balance/{address}", get(get_balance))
        .route("/tx", post(submit_tx))
        .route("/withdraw", post(submit_withdrawal))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
pub struct SubmitTxRequest {
    pub tx: SignedTransaction,
}

#[derive(Deserialize)]
pub struct WithdrawRequest {
    pub tx: SignedTransaction,
    pub recipient_l1: String,
}

#[derive(Serialize)]
struct ReceiptBody {
    txid: String,
    /// Provisional: the locally committed block this transaction will
    /// land in; DA commitment follows asynchronously.
    block_height: Height,
}

async fn health() -> &'static str {
    "ok"
}

async fn head(State(state): State<ApiState>) -> Json<Value> {
    let status: ChainStatus = *state.handle.status.borrow();
    Json(json!({
        "height": status.height,
        "state_root": hex::encode(status.state_root),
        "da_confirmation_blocks": state.da_confirmation_blocks,
    }))
}

async fn state_root(State(state): State<ApiState>) -> Json<Value> {
    let status: ChainStatus = *state.handle.status.borrow();
    Json(json!({ "state_root": hex::encode(status.state_root) }))
}

async fn get_block(
    State(state): State<ApiState>,
    Path(height): Path<Height>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let record = state
        .storage
        .fetch_block(height)
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("block {height} not found")))?;

    Ok(Json(json!({
        "height": record.header.height,
        "hash": hex::encode(record.header.hash()),
        "prev_hash": hex::encode(record.header.prev_hash),
        "state_root": hex::encode(record.header.state_root),
        "tx_merkle_root": hex::encode(record.header.tx_merkle_root),
        "timestamp": record.header.timestamp,
        "tx_count": record.header.tx_count,
        "txids": record.txids.iter().map(hex::encode).collect::<Vec<_>>(),
        "local_committed": record.local_committed,
        "da_committed": record.da_committed,
        "blob_ref": record.blob_ref,
    })))
}

async fn get_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let address: fontana_types::Address = hex::decode(&address)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| bad_request("address must be 64 hex characters".into()))?;

    let balance = state.storage.balance(&address).map_err(internal)?;
    Ok(Json(json!({
        "address": hex::encode(address),
        "balance": balance,
    })))
}

async fn submit_tx(
    State(state): State<ApiState>,
    Json(request): Json<SubmitTxRequest>,
) -> Result<Json<ReceiptBody>, (StatusCode, Json<Value>)> {
    if request.tx.kind != TxKind::Transfer {
        return Err(bad_request(
            "only transfer transactions may be submitted here; use /withdraw for burns".into(),
        ));
    }

    let (reply, done) = oneshot::channel();
    let msg = NodeMsg::SubmitTransaction {
        tx: request.tx,
        reply,
    };
    send_to_writer(&state, msg, done).await
}

async fn submit_withdrawal(
    State(state): State<ApiState>,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<ReceiptBody>, (StatusCode, Json<Value>)> {
    let (reply, done) = oneshot::channel();
    let msg = NodeMsg::SubmitBurn {
        tx: request.tx,
        recipient_l1: request.recipient_l1,
        reply,
    };
    send_to_writer(&state, msg, done).await
}

async fn send_to_writer(
    state: &ApiState,
    msg: NodeMsg,
    done: oneshot::Receiver<Result<TxReceipt, LedgerError>>,
) -> Result<Json<ReceiptBody>, (StatusCode, Json<Value>)> {
    if state.handle.mailbox.send(msg).await.is_err() {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "node is shutting down" })),
        ));
    }

    match done.await {
        Ok(Ok(receipt)) => Ok(Json(ReceiptBody {
            txid: hex::encode(receipt.txid),
            block_height: receipt.block_height,
        })),
        Ok(Err(e)) => Err(ledger_error(e)),
        Err(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "writer dropped the request" })),
        )),
    }
}

fn ledger_error(e: LedgerError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        LedgerError::Validation(v) => match v {
            ValidationError::InsufficientFunds { .. }
            | ValidationError::InputAlreadySpent(_) => StatusCode::PAYMENT_REQUIRED,
            _ => StatusCode::BAD_REQUEST,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message })))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
}
