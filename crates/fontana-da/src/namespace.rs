//! Namespace parsing and per-height derivation.

use crate::{DaError, Namespace, NAMESPACE_LEN};
use sha2::{Digest, Sha256};

/// Parse the configured base namespace: exactly 16 hex characters.
pub fn parse_namespace_base(raw: &str) -> Result<Namespace, DaError> {
    let bytes = hex::decode(raw)
        .map_err(|_| DaError::Permanent(format!("namespace base {raw:?} is not hex")))?;
    bytes.try_into().map_err(|_| {
        DaError::Permanent(format!(
            "namespace base {raw:?} must be {} hex characters",
            NAMESPACE_LEN * 2
        ))
    })
}

/// Namespace for the block at `height`: `SHA-256(base || height)`
/// truncated to the namespace width. Deterministic, so recovery can
/// re-derive the whole sequence from configuration alone.
pub fn derive_namespace(base: &Namespace, height: u64) -> Namespace {
    let mut hasher = Sha256::new();
    hasher.update(base);
    hasher.update(height.to_le_bytes());
    let digest = hasher.finalize();
    let mut namespace = [0u8; NAMESPACE_LEN];
    namespace.copy_from_slice(&digest[..NAMESPACE_LEN]);
    namespace
}

pub fn format_namespace(namespace: &Namespace) -> String {
    hex::encode(namespace)
}
