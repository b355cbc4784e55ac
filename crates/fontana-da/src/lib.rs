//! Data-availability client interface.
//!
//! Blocks are posted as opaque blobs under 8-byte namespaces derived
//! per height from a configured base. The wire protocol is behind
//! [`DaClient`]; the node ships an HTTP JSON-RPC implementation and an
//! in-memory one for tests and local runs.

pub mod http;
pub mod memory;
pub mod namespace;

pub use http::HttpDaClient;
pub use memory::MemoryDa;
pub use namespace::{derive_namespace, format_namespace, parse_namespace_base};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

/// Width of a DA namespace identifier.
pub const NAMESPACE_LEN: usize = 8;

pub type Namespace = [u8; NAMESPACE_LEN];

#[derive(Error, Debug, Clone)]
pub enum DaError {
    /// Worth retrying with backoff: the DA node is unreachable, slow,
    /// or momentarily overloaded.
    #[error("transient da failure: {0}")]
    Transient(String),
    /// Retrying cannot help: bad namespace, oversized blob, rejected
    /// auth. Needs an operator.
    #[error("permanent da failure: {0}")]
    Permanent(String),
}

impl DaError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DaError::Transient(_))
    }
}

/// Receipt for a successfully submitted blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub da_height: u64,
    pub commitment: Vec<u8>,
}

impl SubmitReceipt {
    /// `da:{da_height}:{base64 commitment}`, the persisted blob
    /// reference format.
    pub fn blob_ref(&self) -> String {
        format!("da:{}:{}", self.da_height, BASE64.encode(&self.commitment))
    }
}

/// A blob fetched back from the DA layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedBlob {
    pub bytes: Vec<u8>,
    pub blob_ref: String,
}

/// The DA layer as the node sees it. One namespace carries at most one
/// block blob, so fetch is keyed by namespace alone.
#[async_trait::async_trait]
pub trait DaClient: Send + Sync {
    async fn submit_blob(
        &self,
        namespace: Namespace,
        bytes: Vec<u8>,
    ) -> Result<SubmitReceipt, DaError>;

    /// `Ok(None)` means the namespace holds no blob yet - for recovery
    /// that is the chain tip, not an error.
    async fn fetch_blob(&self, namespace: Namespace) -> Result<Option<FetchedBlob>, DaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ref_format() {
        let receipt = SubmitReceipt {
            da_height: 1234,
            commitment: b"foo".to_vec(),
        };
        assert_eq!(receipt.blob_ref(), "da:1234:Zm9v");
    }

    #[test]
    fn transient_classification() {
        assert!(DaError::Transient("x".into()).is_transient());
        assert!(!DaError::Permanent("x".into()).is_transient());
    }
}
