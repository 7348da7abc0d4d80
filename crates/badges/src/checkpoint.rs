use merkle::{Hash32, MerkleProof, MerkleTree};
use serde::{Deserialize, Serialize};

use crate::leaf;
use crate::{BadgeAwardRecord, BadgeError, LeafCollision, LeafIndex, RawBadgeAward, Result, Window};

/// Root committed for one ledger window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub root: Hash32,
    pub window: Window,
}

/// One leaf ready to be minted against a published root
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeClaim {
    pub leaf_index: usize,
    pub ledger_index: u64,
    pub record: BadgeAwardRecord,
    pub leaf: Hash32,
    pub proof: MerkleProof,
}

impl BadgeClaim {
    pub fn siblings(&self) -> Vec<Hash32> {
        self.proof.siblings()
    }

    pub fn positions(&self) -> Vec<u8> {
        self.proof.position_flags()
    }

    pub fn verify(&self, root: Hash32) -> bool {
        self.proof.verify(self.leaf, root)
    }
}

/// A ledger window encoded and committed in memory.
///
/// Built once per run from a single ledger snapshot; proofs are derived
/// from it on demand and never cached elsewhere.
#[derive(Clone, Debug)]
pub struct CommittedWindow {
    window: Window,
    records: Vec<BadgeAwardRecord>,
    tree: MerkleTree,
}

impl CommittedWindow {
    /// Encode `raw` (ledger order) and build the tree for `window`.
    ///
    /// A read shorter than `window.tree_size` is taken as the true final
    /// window and the window is truncated to match.
    pub fn build(window: Window, raw: &[RawBadgeAward]) -> Result<Self> {
        let returned = raw.len() as u64;
        if returned > window.tree_size {
            return Err(BadgeError::Oversized { window, returned });
        }
        if raw.is_empty() {
            return Err(BadgeError::EmptyLedgerWindow { window });
        }
        let window = window.truncated(returned);

        let mut records = Vec::with_capacity(raw.len());
        let mut leaves = Vec::with_capacity(raw.len());
        let mut previous: Option<u64> = None;

        for (leaf_index, row) in raw.iter().enumerate() {
            if let Some(prev) = previous {
                if row.global_badge_number <= prev {
                    return Err(BadgeError::LedgerOrder {
                        window,
                        leaf_index,
                        previous: prev,
                        found: row.global_badge_number,
                    });
                }
            }
            previous = Some(row.global_badge_number);

            let (record, digest) = leaf::encode(row).map_err(|source| BadgeError::Encoding {
                window,
                leaf_index,
                ledger_index: window.ledger_index(leaf_index),
                record: row.clone(),
                source,
            })?;
            records.push(record);
            leaves.push(digest);
        }

        let tree = MerkleTree::new(leaves)?;
        Ok(Self { window, records, tree })
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn root(&self) -> Hash32 {
        self.tree.root()
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { root: self.root(), window: self.window }
    }

    pub fn records(&self) -> &[BadgeAwardRecord] {
        &self.records
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn claim(&self, leaf_index: usize) -> Result<BadgeClaim> {
        let proof = self.tree.prove(leaf_index).map_err(|_| BadgeError::LeafOutOfRange {
            window: self.window,
            leaf_index,
        })?;

        Ok(BadgeClaim {
            leaf_index,
            ledger_index: self.window.ledger_index(leaf_index),
            record: self.records[leaf_index].clone(),
            leaf: self.tree.leaves()[leaf_index],
            proof,
        })
    }

    /// Claims for every leaf, in ascending leaf order
    pub fn claims(&self) -> Result<Vec<BadgeClaim>> {
        (0..self.len()).map(|i| self.claim(i)).collect()
    }

    /// Leaves shared by several awards. These are reported, never merged,
    /// because dropping one would shift every later index.
    pub fn collisions(&self) -> Vec<LeafCollision> {
        LeafIndex::from_leaves(self.tree.leaves()).collisions()
    }
}

/// Root for a fetched ledger slice
pub fn build_checkpoint(window: Window, raw: &[RawBadgeAward]) -> Result<Checkpoint> {
    Ok(CommittedWindow::build(window, raw)?.checkpoint())
}

/// Every (record, proof) pair for a fetched ledger slice
pub fn generate_proofs(window: Window, raw: &[RawBadgeAward]) -> Result<Vec<BadgeClaim>> {
    CommittedWindow::build(window, raw)?.claims()
}
