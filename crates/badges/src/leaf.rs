//! Leaf encoding
//!
//! leaf = keccak256(winner[20] || definition[1])
//!
//! Same bytes as Solidity `abi.encodePacked(address, int8)`: fixed width,
//! no delimiters, the definition number as its two's-complement byte.

use merkle::{keccak256, Hash32};

use crate::{BadgeAwardRecord, EncodingError, RawBadgeAward, ADDRESS_LEN};

pub const PACKED_LEN: usize = ADDRESS_LEN + 1;

pub fn pack(record: &BadgeAwardRecord) -> [u8; PACKED_LEN] {
    let mut out = [0u8; PACKED_LEN];
    out[..ADDRESS_LEN].copy_from_slice(record.winner.as_bytes());
    out[ADDRESS_LEN] = record.badge_definition_number.to_be_bytes()[0];
    out
}

pub fn leaf_hash(record: &BadgeAwardRecord) -> Hash32 {
    keccak256(&pack(record))
}

/// Validate a ledger row and hash it
pub fn encode(raw: &RawBadgeAward) -> Result<(BadgeAwardRecord, Hash32), EncodingError> {
    let record = BadgeAwardRecord::try_from(raw)?;
    let leaf = leaf_hash(&record);
    Ok((record, leaf))
}
