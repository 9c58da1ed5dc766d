//! Merkle trees over transfer hashes
//!
//! Pairs are hashed order-independently ([`hash_pair`]) so proofs carry no
//! left/right flags. A level with an odd count pairs its last node with
//! itself; the proof for that node then carries the node as its own sibling.

use alloy::primitives::B256;
use serde::Serialize;

use super::ProofError;
use crate::hash::hash_pair;

/// Inclusion proof for one leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MerkleProof {
    pub leaf: B256,
    pub index: usize,
    pub siblings: Vec<B256>,
    pub root: B256,
}

/// All levels of the tree, leaves first, root level last
pub fn build_levels(leaves: &[B256]) -> Result<Vec<Vec<B256>>, ProofError> {
    if leaves.is_empty() {
        return Err(ProofError::EmptyLeaves);
    }

    let mut levels = vec![leaves.to_vec()];
    while let Some(current) = levels.last().filter(|level| level.len() > 1) {
        let next = current
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
        levels.push(next);
    }
    Ok(levels)
}

pub fn merkle_root(leaves: &[B256]) -> Result<B256, ProofError> {
    let levels = build_levels(leaves)?;
    Ok(levels[levels.len() - 1][0])
}

/// Build the inclusion proof for `leaves[index]`
pub fn generate_merkle_proof(leaves: &[B256], index: usize) -> Result<MerkleProof, ProofError> {
    let levels = build_levels(leaves)?;
    if index >= leaves.len() {
        return Err(ProofError::IndexOutOfRange {
            index,
            len: leaves.len(),
        });
    }

    let mut siblings = Vec::with_capacity(levels.len() - 1);
    let mut position = index;
    for level in &levels[..levels.len() - 1] {
        let sibling = if position % 2 == 0 { position + 1 } else { position - 1 };
        // Odd tail: the node was hashed with itself
        siblings.push(*level.get(sibling).unwrap_or(&level[position]));
        position /= 2;
    }

    Ok(MerkleProof {
        leaf: leaves[index],
        index,
        siblings,
        root: levels[levels.len() - 1][0],
    })
}

/// Fold `siblings` into `leaf` and compare with `root`
pub fn verify_merkle_proof(leaf: &B256, siblings: &[B256], root: &B256) -> bool {
    let computed = siblings
        .iter()
        .fold(*leaf, |acc, sibling| hash_pair(&acc, sibling));
    computed == *root
}
