//! Positional Merkle tree
//!
//! Builds a keccak256 binary tree over an ordered list of leaf digests and
//! extracts sibling-path proofs by leaf index. Pairs are hashed in position
//! order (no sorting) and an unpaired last node is carried up a level.

mod crypto;
mod tree;
mod types;

pub use crypto::{hash_pair, keccak256};
pub use tree::MerkleTree;
pub use types::{Hash32, MerkleProof, Position, ProofStep};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a tree from zero leaves")]
    Empty,

    #[error("leaf index {index} out of range for tree of {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },
}

pub type Result<T> = std::result::Result<T, MerkleError>;
