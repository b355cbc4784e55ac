//! Canonical DA blob codec.
//!
//! A blob is `header || tx_count || tx_1 || ... || tx_n`, every field
//! length-prefixed with a little-endian u32. Empty blocks still carry
//! the header and a zero count. Decoding is strict: truncated input,
//! trailing bytes, or a count that disagrees with the header are errors.

use crate::{Block, BlockHeader, SignedTransaction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("blob truncated")]
    Truncated,
    #[error("trailing bytes after block payload")]
    TrailingBytes,
    #[error("header declares {header} transactions, blob carries {body}")]
    TxCountMismatch { header: u32, body: u32 },
    #[error("field too large: {0} bytes")]
    OversizedField(u64),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}

/// Upper bound on a single length-prefixed field.
const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

pub fn encode_block(block: &Block) -> Result<Vec<u8>, CodecError> {
    let header_bytes = bincode::serialize(&block.header)?;
    let mut out = Vec::with_capacity(header_bytes.len() + 8);
    put_field(&mut out, &header_bytes);
    out.extend_from_slice(&(block.transactions.len() as u32).to_le_bytes());
    for tx in &block.transactions {
        let tx_bytes = bincode::serialize(tx)?;
        put_field(&mut out, &tx_bytes);
    }
    Ok(out)
}

pub fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
    let mut cursor = Cursor { bytes, pos: 0 };

    let header_bytes = cursor.take_field()?;
    let header: BlockHeader = bincode::deserialize(header_bytes)?;

    let tx_count = cursor.take_u32()?;
    if tx_count != header.tx_count {
        return Err(CodecError::TxCountMismatch {
            header: header.tx_count,
            body: tx_count,
        });
    }

    let mut transactions = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        let tx_bytes = cursor.take_field()?;
        let tx: SignedTransaction = bincode::deserialize(tx_bytes)?;
        transactions.push(tx);
    }

    if cursor.pos != bytes.len() {
        return Err(CodecError::TrailingBytes);
    }

    Ok(Block {
        header,
        transactions,
    })
}

fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_le_bytes());
    out.extend_from_slice(field);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_u32(&mut self) -> Result<u32, CodecError> {
        let end = self.pos.checked_add(4).ok_or(CodecError::Truncated)?;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated);
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(u32::from_le_bytes(buf))
    }

    fn take_field(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.take_u32()?;
        if len > MAX_FIELD_LEN {
            return Err(CodecError::OversizedField(len as u64));
        }
        let end = self
            .pos
            .checked_add(len as usize)
            .ok_or(CodecError::Truncated)?;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated);
        }
        let field = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tx_merkle_root, TxKind, TxOutput, UtxoRef, ZERO_HASH};

    fn sample_block(tx_count: usize) -> Block {
        let transactions: Vec<SignedTransaction> = (0..tx_count)
            .map(|i| {
                let mut tx = SignedTransaction {
                    txid: ZERO_HASH,
                    inputs: vec![UtxoRef::new([i as u8; 32], 0)],
                    outputs: vec![TxOutput {
                        recipient: [9u8; 32],
                        amount: 10 + i as u64,
                    }],
                    fee: 1,
                    payload_hash: [7u8; 32],
                    sender_pubkey: [8u8; 32],
                    signature: [0u8; 64],
                    kind: TxKind::Transfer,
                };
                tx.txid = tx.compute_txid();
                tx
            })
            .collect();

        let txids: Vec<_> = transactions.iter().map(|t| t.txid).collect();
        Block {
            header: BlockHeader {
                height: 3,
                prev_hash: [1u8; 32],
                state_root: [2u8; 32],
                tx_merkle_root: tx_merkle_root(&txids),
                timestamp: 1_700_000_000,
                tx_count: tx_count as u32,
            },
            transactions,
        }
    }

    #[test]
    fn roundtrip_is_byte_identical() {
        let block = sample_block(3);
        let bytes = encode_block(&block).unwrap();
        let decoded = decode_block(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(encode_block(&decoded).unwrap(), bytes);
    }

    #[test]
    fn empty_block_roundtrip() {
        let block = sample_block(0);
        let bytes = encode_block(&block).unwrap();
        let decoded = decode_block(&bytes).unwrap();
        assert_eq!(decoded.transactions.len(), 0);
        assert_eq!(decoded.header, block.header);
    }

    #[test]
    fn truncated_blob_rejected() {
        let bytes = encode_block(&sample_block(2)).unwrap();
        assert!(matches!(
            decode_block(&bytes[..bytes.len() - 3]),
            Err(CodecError::Truncated) | Err(CodecError::Encoding(_))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode_block(&sample_block(1)).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_block(&bytes),
            Err(CodecError::TrailingBytes)
        ));
    }

    #[test]
    fn tx_count_mismatch_rejected() {
        let mut block = sample_block(2);
        block.header.tx_count = 5;
        let bytes = encode_block(&block).unwrap();
        assert!(matches!(
            decode_block(&bytes),
            Err(CodecError::TxCountMismatch { header: 5, body: 2 })
        ));
    }
}
