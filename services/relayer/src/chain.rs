//! On-chain checkpoint store and badge registry

use async_trait::async_trait;
use badges::{BadgeClaim, Checkpoint};
use merkle::Hash32;
use tracing::info;

use crate::abi;
use crate::config::EvmEndpoint;
use crate::retry::RetryPolicy;
use crate::rpc::{ChainError, Receipt, RpcClient, TxHash};

/// Accepts published `(root, window)` checkpoints.
///
/// Submission and confirmation are separate calls so the caller can record
/// the transaction before waiting on it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Send the checkpoint; returns once the node has accepted the transaction
    async fn submit_checkpoint(&self, checkpoint: &Checkpoint) -> Result<TxHash, ChainError>;

    /// Wait for a submitted checkpoint transaction to be mined
    async fn confirm_checkpoint(&self, tx_hash: &str) -> Result<Receipt, ChainError>;
}

/// Mints one badge against a published root
#[async_trait]
pub trait MintGateway: Send + Sync {
    async fn mint(&self, claim: &BadgeClaim, root: Hash32) -> Result<TxHash, ChainError>;
}

/// SubgraphController `postMerkleRoot`
pub struct EvmCheckpointStore {
    rpc: RpcClient,
    contract: String,
    from: String,
}

impl EvmCheckpointStore {
    pub fn new(endpoint: &EvmEndpoint, policy: RetryPolicy) -> Self {
        Self::with_client(endpoint, RpcClient::new(&endpoint.rpc_url, policy))
    }

    pub fn with_client(endpoint: &EvmEndpoint, rpc: RpcClient) -> Self {
        Self {
            rpc,
            contract: endpoint.contract.clone(),
            from: endpoint.from.clone(),
        }
    }
}

#[async_trait]
impl CheckpointStore for EvmCheckpointStore {
    async fn submit_checkpoint(&self, checkpoint: &Checkpoint) -> Result<TxHash, ChainError> {
        let data = abi::encode_post_merkle_root(
            checkpoint.root,
            checkpoint.window.starting_index,
            checkpoint.window.tree_size,
        );
        let tx_hash = self.rpc.send_transaction(&self.from, &self.contract, &data).await?;
        info!(tx_hash = %tx_hash, window = %checkpoint.window, "postMerkleRoot sent");
        Ok(tx_hash)
    }

    async fn confirm_checkpoint(&self, tx_hash: &str) -> Result<Receipt, ChainError> {
        let receipt = self.rpc.wait_for_receipt(tx_hash).await?;
        info!(tx_hash, block = receipt.block_number, "postMerkleRoot mined");
        Ok(receipt)
    }
}

/// Registry `mint`
pub struct EvmBadgeRegistry {
    rpc: RpcClient,
    contract: String,
    from: String,
}

impl EvmBadgeRegistry {
    pub fn new(endpoint: &EvmEndpoint, policy: RetryPolicy) -> Self {
        Self::with_client(endpoint, RpcClient::new(&endpoint.rpc_url, policy))
    }

    pub fn with_client(endpoint: &EvmEndpoint, rpc: RpcClient) -> Self {
        Self {
            rpc,
            contract: endpoint.contract.clone(),
            from: endpoint.from.clone(),
        }
    }
}

#[async_trait]
impl MintGateway for EvmBadgeRegistry {
    async fn mint(&self, claim: &BadgeClaim, root: Hash32) -> Result<TxHash, ChainError> {
        let data = abi::encode_mint(&claim.record, &claim.siblings(), &claim.positions(), root);
        let tx_hash = self.rpc.send_transaction(&self.from, &self.contract, &data).await?;
        self.rpc.wait_for_receipt(&tx_hash).await?;
        Ok(tx_hash)
    }
}
