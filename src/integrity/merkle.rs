//! Merkle Aggregation
//!
//! Leaves are hex hashes. Each level pairs nodes left to right as
//! `SHA-256(left ‖ right)` over the hex text; an unpaired last node moves up
//! unchanged rather than being hashed with itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::hashing::sha256_hex;
use crate::error::{IntegrityError, Result};

pub fn hash_pair(left: &str, right: &str) -> String {
    sha256_hex(format!("{}{}", left, right).as_bytes())
}

/// Every level of the tree, leaves first, root last.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    /// `None` when there are no leaves.
    pub fn build(leaves: &[String]) -> Option<Self> {
        if leaves.is_empty() {
            return None;
        }

        let mut levels = vec![leaves.to_vec()];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next: Vec<String> = current
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => hash_pair(&pair[0], right),
                    None => pair[0].clone(),
                })
                .collect();
            levels.push(next);
        }

        debug!("Built Merkle tree: {} leaves, {} levels", leaves.len(), levels.len());
        Some(Self { levels })
    }

    pub fn root(&self) -> &str {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        if index >= self.leaf_count() {
            return Err(IntegrityError::ValidationError(format!(
                "Leaf index {} out of range for {} leaves",
                index,
                self.leaf_count()
            )));
        }

        let mut steps = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if position % 2 == 0 {
                level.get(position + 1).map(|hash| ProofStep {
                    hash: hash.clone(),
                    side: Side::Right,
                })
            } else {
                Some(ProofStep {
                    hash: level[position - 1].clone(),
                    side: Side::Left,
                })
            };
            // No sibling means the node was carried up as is.
            steps.extend(sibling);
            position /= 2;
        }

        Ok(MerkleProof {
            leaf_hash: self.levels[0][index].clone(),
            leaf_index: index,
            steps,
            root_hash: self.root().to_string(),
        })
    }
}

/// Root over `leaves`, or `None` for an empty set.
pub fn build_root(leaves: &[String]) -> Option<String> {
    MerkleTree::build(leaves).map(|tree| tree.root().to_string())
}

pub fn build_proof(leaves: &[String], index: usize) -> Result<MerkleProof> {
    MerkleTree::build(leaves)
        .ok_or_else(|| IntegrityError::ValidationError("No leaves to prove against".to_string()))?
        .proof(index)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub leaf_index: usize,
    pub steps: Vec<ProofStep>,
    pub root_hash: String,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        verify_merkle_proof(self, &self.leaf_hash, &self.root_hash)
    }
}

pub fn verify_merkle_proof(proof: &MerkleProof, leaf_hash: &str, root_hash: &str) -> bool {
    let computed = proof
        .steps
        .iter()
        .fold(leaf_hash.to_string(), |current, step| match step.side {
            Side::Left => hash_pair(&step.hash, &current),
            Side::Right => hash_pair(&current, &step.hash),
        });
    computed == root_hash
}
