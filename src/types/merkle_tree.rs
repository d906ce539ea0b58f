//! Merkle root computation for block transaction commitments.
//!
//! Behavior:
//! - An empty list of leaves yields the all-zero hash.
//! - Odd layers are padded by duplicating the last node before pairing.
//! - Pairs are combined with double SHA-256, reduced in place.

use crate::types::hash::{Hash256, hash256};

const EMPTY_ROOT: Hash256 = Hash256::zero();

/// Utility functions to build merkle roots from leaf hashes.
pub struct MerkleTree;

impl MerkleTree {
    fn hash_pair(left: Hash256, right: Hash256) -> Hash256 {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(left.as_slice());
        buf[32..].copy_from_slice(right.as_slice());
        hash256(&buf)
    }

    /// Computes a merkle root from the provided leaf hashes.
    ///
    /// Performs an in-place reduction; when a level has an odd number of
    /// nodes the last node is duplicated for the final pair. Returns the
    /// zero hash when `nodes` is empty.
    pub fn compute_root(mut nodes: Vec<Hash256>) -> Hash256 {
        if nodes.is_empty() {
            return EMPTY_ROOT;
        }

        let mut len = nodes.len();

        while len > 1 {
            let mut write = 0;
            let mut read = 0;

            while read < len {
                let left = nodes[read];
                let right = if read + 1 < len {
                    nodes[read + 1]
                } else {
                    left
                };

                nodes[write] = Self::hash_pair(left, right);

                write += 1;
                read += 2;
            }

            len = write;
        }

        nodes[0]
    }
}
