use std::collections::HashMap;
use merkle::Hash32;

/// Leaf shared by more than one position in a window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafCollision {
    pub leaf: Hash32,
    pub leaf_indices: Vec<usize>,
}

/// Leaf digest -> positions, in insertion order
#[derive(Default)]
pub struct LeafIndex {
    map: HashMap<Hash32, Vec<usize>>,
}

impl LeafIndex {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn from_leaves(leaves: &[Hash32]) -> Self {
        let mut index = Self::new();
        for (i, leaf) in leaves.iter().enumerate() {
            index.add(*leaf, i);
        }
        index
    }

    pub fn add(&mut self, leaf: Hash32, leaf_index: usize) {
        self.map.entry(leaf).or_default().push(leaf_index);
    }

    pub fn positions(&self, leaf: &Hash32) -> &[usize] {
        self.map.get(leaf).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Every leaf seen more than once, ordered by first occurrence
    pub fn collisions(&self) -> Vec<LeafCollision> {
        let mut out: Vec<LeafCollision> = self
            .map
            .iter()
            .filter(|(_, idx)| idx.len() > 1)
            .map(|(leaf, idx)| LeafCollision { leaf: *leaf, leaf_indices: idx.clone() })
            .collect();
        out.sort_by_key(|c| c.leaf_indices[0]);
        out
    }
}
