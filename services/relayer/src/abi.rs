//! Minimal Solidity ABI encoding for the two contract calls the relayer makes.
//!
//! ```text
//! postMerkleRoot(bytes32 root, uint256 startingIndex, uint256 treeSize)
//! mint((address winner, int8 badgeDefinitionNumber) badge,
//!      bytes32[] proof, uint256[] positions, bytes32 root)
//! ```

use badges::{Address, BadgeAwardRecord};
use merkle::{keccak256, Hash32};

pub const POST_MERKLE_ROOT_SIG: &str = "postMerkleRoot(bytes32,uint256,uint256)";
pub const MINT_SIG: &str = "mint((address,int8),bytes32[],uint256[],bytes32)";

type Word = [u8; 32];

/// First four bytes of keccak256 of the canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

fn uint_word(v: u64) -> Word {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&v.to_be_bytes());
    w
}

fn int8_word(v: i8) -> Word {
    // sign-extended to 256 bits
    let fill = if v < 0 { 0xff } else { 0x00 };
    let mut w = [fill; 32];
    w[31] = v as u8;
    w
}

fn address_word(a: &Address) -> Word {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

fn concat(sel: [u8; 4], words: &[Word]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + words.len() * 32);
    out.extend_from_slice(&sel);
    for w in words {
        out.extend_from_slice(w);
    }
    out
}

pub fn encode_post_merkle_root(root: Hash32, starting_index: u64, tree_size: u64) -> Vec<u8> {
    concat(
        selector(POST_MERKLE_ROOT_SIG),
        &[root, uint_word(starting_index), uint_word(tree_size)],
    )
}

pub fn encode_mint(record: &BadgeAwardRecord, proof: &[Hash32], positions: &[u8], root: Hash32) -> Vec<u8> {
    // head: badge tuple (static, inlined as 2 words), 2 offsets, root
    const HEAD_WORDS: u64 = 5;
    let proof_offset = HEAD_WORDS * 32;
    let positions_offset = proof_offset + 32 * (1 + proof.len() as u64);

    let mut words: Vec<Word> = Vec::with_capacity(HEAD_WORDS as usize + 2 + proof.len() + positions.len());
    words.push(address_word(&record.winner));
    words.push(int8_word(record.badge_definition_number));
    words.push(uint_word(proof_offset));
    words.push(uint_word(positions_offset));
    words.push(root);

    words.push(uint_word(proof.len() as u64));
    words.extend(proof.iter().copied());

    words.push(uint_word(positions.len() as u64));
    words.extend(positions.iter().map(|p| uint_word(*p as u64)));

    concat(selector(MINT_SIG), &words)
}

/// `0x`-prefixed lowercase hex, as JSON-RPC expects
pub fn to_hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
