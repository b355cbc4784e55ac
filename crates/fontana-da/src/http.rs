//! HTTP JSON-RPC DA client.

use crate::{namespace::format_namespace, DaClient, DaError, FetchedBlob, Namespace, SubmitReceipt};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpDaClient {
    url: String,
    auth_token: Option<String>,
    client: Client,
}

impl HttpDaClient {
    pub fn new(url: &str, auth_token: Option<String>) -> Result<Self, DaError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| DaError::Permanent(format!("http client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            auth_token,
            client,
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, DaError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "fontana",
            "method": method,
            "params": params,
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        // transport problems are retryable; the node may just be down
        let response = request
            .send()
            .await
            .map_err(|e| DaError::Transient(format!("da rpc: {e}")))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| DaError::Transient(format!("da rpc: {e}")))?;

        if let Some(error) = body.error {
            // JSON-RPC server errors (-32000..) are load or state and
            // retryable; anything else means the request itself is bad
            let message = format!("da rpc error {}: {}", error.code, error.message);
            return if (-32099..=-32000).contains(&error.code) {
                Err(DaError::Transient(message))
            } else {
                Err(DaError::Permanent(message))
            };
        }

        body.result
            .ok_or_else(|| DaError::Permanent("da rpc: empty result".into()))
    }
}

#[async_trait::async_trait]
impl DaClient for HttpDaClient {
    async fn submit_blob(
        &self,
        namespace: Namespace,
        bytes: Vec<u8>,
    ) -> Result<SubmitReceipt, DaError> {
        let result = self
            .call(
                "blob.Submit",
                vec![
                    json!(format_namespace(&namespace)),
                    json!(BASE64.encode(&bytes)),
                ],
            )
            .await?;

        let receipt: SubmitResult = serde_json::from_value(result)
            .map_err(|e| DaError::Permanent(format!("da rpc: bad submit result: {e}")))?;
        let commitment = BASE64
            .decode(&receipt.commitment)
            .map_err(|e| DaError::Permanent(format!("da rpc: bad commitment: {e}")))?;

        Ok(SubmitReceipt {
            da_height: receipt.height,
            commitment,
        })
    }

    async fn fetch_blob(&self, namespace: Namespace) -> Result<Option<FetchedBlob>, DaError> {
        let result = self
            .call("blob.Get", vec![json!(format_namespace(&namespace))])
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let blob: GetResult = serde_json::from_value(result)
            .map_err(|e| DaError::Permanent(format!("da rpc: bad blob result: {e}")))?;
        let bytes = BASE64
            .decode(&blob.data)
            .map_err(|e| DaError::Permanent(format!("da rpc: bad blob data: {e}")))?;
        let commitment = BASE64
            .decode(&blob.commitment)
            .map_err(|e| DaError::Permanent(format!("da rpc: bad commitment: {e}")))?;

        let receipt = SubmitReceipt {
            da_height: blob.height,
            commitment,
        };
        Ok(Some(FetchedBlob {
            bytes,
            blob_ref: receipt.blob_ref(),
        }))
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
struct SubmitResult {
    height: u64,
    commitment: String,
}

#[derive(Deserialize)]
struct GetResult {
    data: String,
    height: u64,
    commitment: String,
}
