//! Core types for positional Merkle proofs

use serde::{Deserialize, Serialize};

use crate::crypto;

/// 32-byte hash
pub type Hash32 = [u8; 32];

/// Side a sibling occupies relative to the path node at its level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

impl Position {
    /// On-chain flag encoding: right = 1, left = 0
    pub fn as_flag(self) -> u8 {
        match self {
            Position::Left => 0,
            Position::Right => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash32,
    pub position: Position,
}

/// Inclusion proof for one leaf, ordered from the leaf level upwards.
///
/// Levels where the path node was carried up without a partner contribute
/// no step, so a proof can be shorter than the tree depth.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn siblings(&self) -> Vec<Hash32> {
        self.steps.iter().map(|s| s.sibling).collect()
    }

    pub fn position_flags(&self) -> Vec<u8> {
        self.steps.iter().map(|s| s.position.as_flag()).collect()
    }

    /// Replay the sibling path from `leaf` and return the resulting root
    pub fn compute_root(&self, leaf: Hash32) -> Hash32 {
        self.steps.iter().fold(leaf, |current, step| match step.position {
            Position::Right => crypto::hash_pair(current, step.sibling),
            Position::Left => crypto::hash_pair(step.sibling, current),
        })
    }

    pub fn verify(&self, leaf: Hash32, root: Hash32) -> bool {
        self.compute_root(leaf) == root
    }
}
