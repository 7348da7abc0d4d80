//! Hashing used by leaves and internal nodes

use crate::Hash32;
use sha3::{Digest, Keccak256};

/// keccak256 as used by the EVM (pre-standard SHA-3 padding)
pub fn keccak256(data: &[u8]) -> Hash32 {
    Keccak256::digest(data).into()
}

/// Internal node hash
/// node = keccak256(left || right)
///
/// The pair is hashed in positional order. It is never sorted, so swapping
/// two siblings changes the parent.
pub fn hash_pair(left: Hash32, right: Hash32) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
