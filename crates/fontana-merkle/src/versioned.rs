//! Root versioning for the sparse Merkle tree.
//!
//! Mutations are journalled as `(key, old, new)` deltas. Sealing the
//! journal at a block height snapshots `(height, root)` and keeps the
//! deltas so a proof against any retained root can be produced by
//! rolling the journal back on a scratch copy of the tree. Memory is
//! bounded by the retention depth.

use crate::{Hash, MerkleProof, SparseMerkleTree};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("state root {} is not retained", hex::encode(.0))]
    UnknownRoot(Hash),
}

#[derive(Clone, Debug)]
struct Delta {
    key: Hash,
    old: Option<Hash>,
    new: Option<Hash>,
}

#[derive(Clone, Debug)]
struct Seal {
    height: u64,
    root: Hash,
    deltas: Vec<Delta>,
}

/// A sparse Merkle tree plus the journal of recently sealed versions.
#[derive(Clone, Debug)]
pub struct VersionedTree {
    tree: SparseMerkleTree,
    /// Deltas applied since the last seal.
    journal: Vec<Delta>,
    /// Oldest-first sealed versions, at most `retain` of them.
    seals: VecDeque<Seal>,
    retain: usize,
}

impl VersionedTree {
    pub fn new(retain: usize) -> Self {
        Self {
            tree: SparseMerkleTree::new(),
            journal: Vec::new(),
            seals: VecDeque::new(),
            retain: retain.max(1),
        }
    }

    /// Adopt an already-populated tree (e.g. rebuilt from storage).
    pub fn from_tree(tree: SparseMerkleTree, retain: usize) -> Self {
        Self {
            tree,
            journal: Vec::new(),
            seals: VecDeque::new(),
            retain: retain.max(1),
        }
    }

    pub fn root(&self) -> Hash {
        self.tree.root()
    }

    pub fn get(&self, key: &Hash) -> Option<Hash> {
        self.tree.get(key)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn insert(&mut self, key: Hash, leaf: Hash) {
        let old = self.tree.get(&key);
        self.journal.push(Delta {
            key,
            old,
            new: Some(leaf),
        });
        self.tree.insert(key, leaf);
    }

    pub fn remove(&mut self, key: &Hash) {
        let Some(old) = self.tree.get(key) else {
            return;
        };
        self.journal.push(Delta {
            key: *key,
            old: Some(old),
            new: None,
        });
        self.tree.remove(key);
    }

    /// Seal the pending journal as the version at `height`, evicting the
    /// oldest seal beyond the retention depth.
    pub fn seal(&mut self, height: u64) {
        let deltas = std::mem::take(&mut self.journal);
        self.seals.push_back(Seal {
            height,
            root: self.tree.root(),
            deltas,
        });
        while self.seals.len() > self.retain {
            self.seals.pop_front();
        }
    }

    /// Root sealed at `height`, if still retained.
    pub fn root_at(&self, height: u64) -> Option<Hash> {
        self.seals
            .iter()
            .find(|s| s.height == height)
            .map(|s| s.root)
    }

    /// Proof against the current root.
    pub fn prove(&self, key: &Hash) -> MerkleProof {
        self.tree.prove(key)
    }

    /// Proof against `at_root`, which must be the current root or one of
    /// the retained sealed roots. Rolls the journal back on a scratch
    /// copy of the tree; the live tree is untouched.
    pub fn prove_at(&self, key: &Hash, at_root: &Hash) -> Result<MerkleProof, ProofError> {
        if *at_root == self.tree.root() {
            return Ok(self.tree.prove(key));
        }

        let seal_idx = self
            .seals
            .iter()
            .rposition(|s| s.root == *at_root)
            .ok_or(ProofError::UnknownRoot(*at_root))?;

        let mut scratch = self.tree.clone();
        for delta in self.journal.iter().rev() {
            undo(&mut scratch, delta);
        }
        for seal in self.seals.iter().skip(seal_idx + 1).rev() {
            for delta in seal.deltas.iter().rev() {
                undo(&mut scratch, delta);
            }
        }

        debug_assert_eq!(scratch.root(), *at_root);
        Ok(scratch.prove(key))
    }
}

fn undo(tree: &mut SparseMerkleTree, delta: &Delta) {
    match delta.old {
        Some(old) => tree.insert(delta.key, old),
        None => tree.remove(&delta.key),
    }
}
