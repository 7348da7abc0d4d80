//! Badge award commitments
//!
//! Turns an ordered slice of the badge-award ledger into a Merkle checkpoint
//! and regenerates the per-leaf proofs used to mint against it.

pub mod schema;
pub mod leaf;
pub mod window;
pub mod checkpoint;
pub mod index;

pub use schema::*;
pub use window::{next_window, validate_window, Window, WindowError};
pub use checkpoint::*;
pub use index::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BadgeError {
    #[error("window {window}: leaf {leaf_index} (ledger #{ledger_index}) failed to encode: {source}; record {record:?}")]
    Encoding {
        window: Window,
        leaf_index: usize,
        ledger_index: u64,
        record: RawBadgeAward,
        #[source]
        source: EncodingError,
    },

    #[error("window {window}: ledger out of order at leaf {leaf_index}: global badge #{found} after #{previous}")]
    LedgerOrder {
        window: Window,
        leaf_index: usize,
        previous: u64,
        found: u64,
    },

    #[error("window {window}: ledger returned no records")]
    EmptyLedgerWindow { window: Window },

    #[error("window {window}: ledger returned {returned} records")]
    Oversized { window: Window, returned: u64 },

    #[error("window {window}: leaf index {leaf_index} out of range")]
    LeafOutOfRange { window: Window, leaf_index: usize },

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Merkle(#[from] merkle::MerkleError),
}

pub type Result<T> = std::result::Result<T, BadgeError>;
