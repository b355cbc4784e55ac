//! In-memory DA backend for tests and local single-node runs.

use crate::{DaClient, DaError, FetchedBlob, Namespace, SubmitReceipt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryDa {
    blobs: Mutex<HashMap<Namespace, StoredBlob>>,
    next_height: AtomicU64,
    /// Number of upcoming submits to fail with a transient error.
    fail_submits: AtomicU32,
}

struct StoredBlob {
    bytes: Vec<u8>,
    receipt: SubmitReceipt,
}

impl MemoryDa {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            next_height: AtomicU64::new(1),
            fail_submits: AtomicU32::new(0),
        }
    }

    /// Make the next `n` submits fail transiently.
    pub fn fail_next_submits(&self, n: u32) {
        self.fail_submits.store(n, Ordering::SeqCst);
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().expect("da lock").len()
    }
}

#[async_trait::async_trait]
impl DaClient for MemoryDa {
    async fn submit_blob(
        &self,
        namespace: Namespace,
        bytes: Vec<u8>,
    ) -> Result<SubmitReceipt, DaError> {
        if self
            .fail_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DaError::Transient("injected submit failure".into()));
        }

        let mut blobs = self.blobs.lock().expect("da lock");
        if let Some(existing) = blobs.get(&namespace) {
            // at-least-once delivery: a duplicate submit returns the
            // original receipt instead of storing a second copy
            return Ok(existing.receipt.clone());
        }

        let da_height = self.next_height.fetch_add(1, Ordering::SeqCst);
        let commitment: Vec<u8> = Sha256::digest(&bytes).to_vec();
        let receipt = SubmitReceipt {
            da_height,
            commitment,
        };
        blobs.insert(
            namespace,
            StoredBlob {
                bytes,
                receipt: receipt.clone(),
            },
        );
        Ok(receipt)
    }

    async fn fetch_blob(&self, namespace: Namespace) -> Result<Option<FetchedBlob>, DaError> {
        let blobs = self.blobs.lock().expect("da lock");
        Ok(blobs.get(&namespace).map(|stored| FetchedBlob {
            bytes: stored.bytes.clone(),
            blob_ref: stored.receipt.blob_ref(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_then_fetch_roundtrip() {
        let da = MemoryDa::new();
        let ns = [1u8; 8];

        let receipt = da.submit_blob(ns, b"payload".to_vec()).await.unwrap();
        assert_eq!(receipt.da_height, 1);

        let fetched = da.fetch_blob(ns).await.unwrap().unwrap();
        assert_eq!(fetched.bytes, b"payload");
        assert_eq!(fetched.blob_ref, receipt.blob_ref());

        assert!(da.fetch_blob([9u8; 8]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_submit_returns_original_receipt() {
        let da = MemoryDa::new();
        let ns = [1u8; 8];
        let first = da.submit_blob(ns, b"a".to_vec()).await.unwrap();
        let second = da.submit_blob(ns, b"a".to_vec()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(da.blob_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let da = MemoryDa::new();
        da.fail_next_submits(2);

        let ns = [1u8; 8];
        for _ in 0..2 {
            let err = da.submit_blob(ns, b"x".to_vec()).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(da.submit_blob(ns, b"x".to_vec()).await.is_ok());
    }
}
