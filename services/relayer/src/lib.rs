//! Badge checkpoint relayer: reads the award ledger, posts Merkle roots and
//! drives per-leaf mints against them.

pub mod abi;
pub mod chain;
pub mod config;
pub mod driver;
pub mod journal;
pub mod ledger;
pub mod retry;
pub mod routes;
pub mod rpc;
pub mod state;
