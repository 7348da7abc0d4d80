use crate::crypto;
use crate::{Hash32, MerkleError, MerkleProof, Position, ProofStep, Result};

/// Binary Merkle tree over an ordered list of leaves.
///
/// `levels[0]` holds the leaves in input order and the last level holds the
/// root. A level with an odd count carries its last node up unchanged.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<Hash32>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::Empty);
        }

        let mut levels = vec![leaves];
        loop {
            let current = &levels[levels.len() - 1];
            if current.len() == 1 {
                break;
            }
            let next = next_level(current);
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> Hash32 {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Number of hashing levels above the leaves (ceil(log2(n)))
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn leaves(&self) -> &[Hash32] {
        &self.levels[0]
    }

    pub fn leaf(&self, index: usize) -> Option<Hash32> {
        self.levels[0].get(index).copied()
    }

    pub fn prove(&self, leaf_index: usize) -> Result<MerkleProof> {
        if leaf_index >= self.leaf_count() {
            return Err(MerkleError::IndexOutOfRange {
                index: leaf_index,
                leaf_count: self.leaf_count(),
            });
        }

        let mut steps = Vec::with_capacity(self.depth());
        let mut index = leaf_index;

        for level in &self.levels[..self.depth()] {
            let is_right = index % 2 == 1;
            let pair = index ^ 1;

            // pair is missing only for a carried last node
            if pair < level.len() {
                steps.push(ProofStep {
                    sibling: level[pair],
                    position: if is_right { Position::Left } else { Position::Right },
                });
            }
            index /= 2;
        }

        Ok(MerkleProof { leaf_index, steps })
    }

    pub fn verify_proof(proof: &MerkleProof, leaf: Hash32, root: Hash32) -> bool {
        proof.verify(leaf, root)
    }
}

fn next_level(level: &[Hash32]) -> Vec<Hash32> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => crypto::hash_pair(*left, *right),
            [carried] => *carried,
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}
