//! Sparse Merkle tree over fixed-width keys.
//!
//! The tree is a full-depth (256 level) binary tree where almost every
//! subtree is empty. Empty subtrees hash to a per-level default, so only
//! the nodes on paths to live leaves are stored. Keys walk the tree
//! MSB-first: bit 0 of the key picks the branch at the root.
//!
//! Proofs are the 256 sibling hashes from the leaf up to the root and
//! work for both inclusion (leaf present) and exclusion (leaf absent,
//! the path hashes the empty-leaf value).
//!
//! [`VersionedTree`] wraps the raw tree with a delta journal so proofs
//! can still be generated against recently sealed roots.

pub mod versioned;

pub use versioned::{ProofError, VersionedTree};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub type Hash = [u8; 32];

/// Number of levels below the root; also the key width in bits.
pub const TREE_DEPTH: usize = 256;

/// Canonical hash of an empty slot.
pub const EMPTY_LEAF: Hash = [0u8; 32];

pub fn hash_siblings(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// MSB-first bit of `key` at position `i` (0 = root branch).
fn bit(key: &Hash, i: usize) -> bool {
    (key[i / 8] >> (7 - (i % 8))) & 1 == 1
}

/// `key` with all bits at positions >= `depth` cleared.
fn mask_prefix(key: &Hash, depth: usize) -> Hash {
    let mut prefix = [0u8; 32];
    let full_bytes = depth / 8;
    prefix[..full_bytes].copy_from_slice(&key[..full_bytes]);
    let rem = depth % 8;
    if rem != 0 {
        prefix[full_bytes] = key[full_bytes] & (0xffu8 << (8 - rem));
    }
    prefix
}

/// Prefix of the sibling subtree at child level `level + 1`.
fn sibling_prefix(key: &Hash, level: usize) -> Hash {
    let mut prefix = mask_prefix(key, level + 1);
    prefix[level / 8] ^= 1 << (7 - (level % 8));
    prefix
}

/// Per-level hashes of fully empty subtrees. `defaults[TREE_DEPTH]` is
/// the empty leaf, `defaults[0]` the root of an empty tree.
fn empty_defaults() -> Vec<Hash> {
    let mut defaults = vec![EMPTY_LEAF; TREE_DEPTH + 1];
    for level in (0..TREE_DEPTH).rev() {
        defaults[level] = hash_siblings(&defaults[level + 1], &defaults[level + 1]);
    }
    defaults
}

/// Merkle proof for one key: the (possibly absent) leaf plus the sibling
/// hashes ordered from the leaf level up to the root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub key: Hash,
    pub leaf: Option<Hash>,
    pub siblings: Vec<Hash>,
}

impl MerkleProof {
    /// Recompute the root this proof commits to and compare.
    pub fn verify(&self, root: &Hash) -> bool {
        if self.siblings.len() != TREE_DEPTH {
            return false;
        }
        let mut current = self.leaf.unwrap_or(EMPTY_LEAF);
        for (i, sibling) in self.siblings.iter().enumerate() {
            let level = TREE_DEPTH - 1 - i;
            current = if bit(&self.key, level) {
                hash_siblings(sibling, &current)
            } else {
                hash_siblings(&current, sibling)
            };
        }
        current == *root
    }
}

#[derive(Clone, Debug)]
pub struct SparseMerkleTree {
    /// Interior nodes that differ from the empty default, keyed by
    /// `(level, masked prefix)`. Level 1..=255; leaves live in `leaves`.
    nodes: HashMap<(u16, Hash), Hash>,
    leaves: HashMap<Hash, Hash>,
    defaults: Vec<Hash>,
    root: Hash,
}

impl Default for SparseMerkleTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseMerkleTree {
    pub fn new() -> Self {
        let defaults = empty_defaults();
        let root = defaults[0];
        Self {
            nodes: HashMap::new(),
            leaves: HashMap::new(),
            defaults,
            root,
        }
    }

    /// Rebuild a tree from scratch out of `(key, leaf)` pairs.
    pub fn from_leaves<I: IntoIterator<Item = (Hash, Hash)>>(leaves: I) -> Self {
        let mut tree = Self::new();
        for (key, leaf) in leaves {
            tree.insert(key, leaf);
        }
        tree
    }

    pub fn root(&self) -> Hash {
        self.root
    }

    pub fn get(&self, key: &Hash) -> Option<Hash> {
        self.leaves.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Insert or overwrite the leaf at `key`.
    pub fn insert(&mut self, key: Hash, leaf: Hash) {
        self.leaves.insert(key, leaf);
        self.recompute_path(&key, leaf);
    }

    /// Remove the leaf at `key`. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &Hash) {
        if self.leaves.remove(key).is_none() {
            return;
        }
        self.recompute_path(key, EMPTY_LEAF);
    }

    /// Proof for `key` against the current root. Absent keys yield an
    /// exclusion proof (`leaf == None`).
    pub fn prove(&self, key: &Hash) -> MerkleProof {
        let mut siblings = Vec::with_capacity(TREE_DEPTH);
        for level in (0..TREE_DEPTH).rev() {
            siblings.push(self.node(level + 1, &sibling_prefix(key, level)));
        }
        MerkleProof {
            key: *key,
            leaf: self.get(key),
            siblings,
        }
    }

    fn node(&self, level: usize, prefix: &Hash) -> Hash {
        if level == TREE_DEPTH {
            return self.leaves.get(prefix).copied().unwrap_or(EMPTY_LEAF);
        }
        self.nodes
            .get(&(level as u16, *prefix))
            .copied()
            .unwrap_or(self.defaults[level])
    }

    fn set_node(&mut self, level: usize, prefix: Hash, hash: Hash) {
        if hash == self.defaults[level] {
            self.nodes.remove(&(level as u16, prefix));
        } else {
            self.nodes.insert((level as u16, prefix), hash);
        }
    }

    fn recompute_path(&mut self, key: &Hash, leaf: Hash) {
        let mut current = leaf;
        for level in (0..TREE_DEPTH).rev() {
            let sibling = self.node(level + 1, &sibling_prefix(key, level));
            current = if bit(key, level) {
                hash_siblings(&sibling, &current)
            } else {
                hash_siblings(&current, &sibling)
            };
            if level > 0 {
                self.set_node(level, mask_prefix(key, level), current);
            }
        }
        self.root = current;
    }

    /// Leaves in arbitrary order, for rebuild comparisons.
    pub fn leaves(&self) -> impl Iterator<Item = (&Hash, &Hash)> {
        self.leaves.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(n: u8) -> Hash {
        let mut k = [0u8; 32];
        k[0] = n;
        k[31] = n.wrapping_mul(7);
        k
    }

    fn leaf(n: u8) -> Hash {
        [n; 32]
    }

    #[test]
    fn empty_root_is_deterministic() {
        let a = SparseMerkleTree::new();
        let b = SparseMerkleTree::new();
        assert_eq!(a.root(), b.root());
        assert_ne!(a.root(), EMPTY_LEAF);
    }

    #[test]
    fn insert_changes_root_remove_restores_it() {
        let mut tree = SparseMerkleTree::new();
        let empty_root = tree.root();

        tree.insert(key(1), leaf(1));
        let one_root = tree.root();
        assert_ne!(one_root, empty_root);

        tree.insert(key(2), leaf(2));
        assert_ne!(tree.root(), one_root);

        tree.remove(&key(2));
        assert_eq!(tree.root(), one_root);

        tree.remove(&key(1));
        assert_eq!(tree.root(), empty_root);
        assert!(tree.is_empty());
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let mut tree = SparseMerkleTree::new();
        tree.insert(key(1), leaf(1));
        let root = tree.root();
        tree.remove(&key(9));
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn overwrite_replaces_leaf() {
        let mut tree = SparseMerkleTree::new();
        tree.insert(key(1), leaf(1));
        tree.insert(key(1), leaf(2));
        assert_eq!(tree.get(&key(1)), Some(leaf(2)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut forward = SparseMerkleTree::new();
        let mut backward = SparseMerkleTree::new();
        for n in 0..20u8 {
            forward.insert(key(n), leaf(n));
        }
        for n in (0..20u8).rev() {
            backward.insert(key(n), leaf(n));
        }
        assert_eq!(forward.root(), backward.root());

        let rebuilt =
            SparseMerkleTree::from_leaves((0..20u8).map(|n| (key(n), leaf(n))));
        assert_eq!(rebuilt.root(), forward.root());
    }

    #[test]
    fn inclusion_proof_verifies() {
        let mut tree = SparseMerkleTree::new();
        for n in 0..8u8 {
            tree.insert(key(n), leaf(n));
        }
        let root = tree.root();
        for n in 0..8u8 {
            let proof = tree.prove(&key(n));
            assert_eq!(proof.leaf, Some(leaf(n)));
            assert!(proof.verify(&root));
        }
    }

    #[test]
    fn exclusion_proof_verifies() {
        let mut tree = SparseMerkleTree::new();
        tree.insert(key(1), leaf(1));
        let root = tree.root();

        let proof = tree.prove(&key(200));
        assert_eq!(proof.leaf, None);
        assert!(proof.verify(&root));
    }

    #[test]
    fn tampered_proof_fails() {
        let mut tree = SparseMerkleTree::new();
        tree.insert(key(1), leaf(1));
        tree.insert(key(2), leaf(2));
        let root = tree.root();
        let proof = tree.prove(&key(1));
        assert!(proof.verify(&root));

        let mut bad_root = root;
        bad_root[0] ^= 1;
        assert!(!proof.verify(&bad_root));

        let mut bad_leaf = proof.clone();
        bad_leaf.leaf = Some(leaf(3));
        assert!(!bad_leaf.verify(&root));

        let mut bad_sibling = proof.clone();
        bad_sibling.siblings[17][0] ^= 1;
        assert!(!bad_sibling.verify(&root));

        let mut short = proof;
        short.siblings.pop();
        assert!(!short.verify(&root));
    }

    proptest! {
        #[test]
        fn prove_verify_roundtrip(entries in prop::collection::hash_map(
            prop::array::uniform32(any::<u8>()),
            prop::array::uniform32(any::<u8>()),
            1..32,
        )) {
            let tree = SparseMerkleTree::from_leaves(
                entries.iter().map(|(k, v)| (*k, *v)),
            );
            let root = tree.root();
            for k in entries.keys() {
                prop_assert!(tree.prove(k).verify(&root));
            }
        }
    }
}
