//! Checkpoint publishing and claim driving.
//!
//! Both operations read the ledger window exactly once and build the whole
//! tree before any on-chain call, so an abandoned call leaves nothing half
//! built locally. A posted root is journaled as pending before its receipt
//! is awaited; publishing stays blocked until [`Relayer::reconcile`] settles it.

use std::sync::Arc;

use badges::{
    next_window, validate_window, Address, BadgeError, Checkpoint, CommittedWindow, LeafCollision,
    Window, WindowError,
};
use merkle::Hash32;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chain::{CheckpointStore, MintGateway};
use crate::journal::{CheckpointStatus, Journal, JournalEntry, JournalError};
use crate::ledger::{LedgerError, LedgerSource};
use crate::rpc::{ChainError, TxHash};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Badge(#[from] BadgeError),

    #[error("window {window}: ledger fetch failed: {source}")]
    Ledger {
        window: Window,
        #[source]
        source: LedgerError,
    },

    #[error("window {window}: chain call failed: {source}")]
    Chain {
        window: Window,
        #[source]
        source: ChainError,
    },

    #[error("window {window}: checkpoint tx {tx_hash} sent but not confirmed ({source}); run reconcile before publishing again")]
    Unconfirmed {
        window: Window,
        tx_hash: TxHash,
        #[source]
        source: ChainError,
    },

    #[error("window {window}: checkpoint tx {tx_hash} is still pending; run reconcile before publishing again")]
    PendingCheckpoint { window: Window, tx_hash: TxHash },

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("window {window}: rebuilt root {rebuilt} does not match expected {expected}")]
    StaleRoot {
        window: Window,
        expected: String,
        rebuilt: String,
    },

    #[error("network has no {0} configured")]
    MissingEndpoint(&'static str),

    #[error("window {window}: cancelled")]
    Cancelled { window: Window },
}

pub fn hex_root(root: &Hash32) -> String {
    format!("0x{}", hex::encode(root))
}

#[derive(Clone, Copy, Debug)]
pub struct PublishRequest {
    pub tree_size: u64,
    /// Explicit start; must chain from the last published window
    pub starting_index: Option<u64>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct PublishOutcome {
    pub requested: Window,
    pub checkpoint: Checkpoint,
    pub tx_hash: Option<TxHash>,
    pub collisions: Vec<LeafCollision>,
}

#[derive(Clone, Copy, Debug)]
pub struct ClaimRequest {
    pub window: Window,
    pub expected_root: Option<Hash32>,
    pub from_leaf: usize,
    pub only_leaf: Option<usize>,
    pub dry_run: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClaimOutcome {
    Minted { tx_hash: TxHash },
    /// Dry run: proof built and checked locally, nothing sent
    Verified,
    Failed { reason: String },
    /// Cancelled while the mint call was in flight; on-chain state unknown
    Interrupted,
    Skipped,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClaimResult {
    pub leaf_index: usize,
    pub ledger_index: u64,
    pub winner: Address,
    pub badge_definition_number: i8,
    #[serde(flatten)]
    pub outcome: ClaimOutcome,
}

/// What [`Relayer::reconcile`] decided for one pending checkpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Confirmed { block_number: u64 },
    /// Reverted on chain; the entry is dropped and the window is free again
    Reverted,
    StillPending { reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct ReconcileResult {
    pub window: Window,
    pub tx_hash: TxHash,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClaimReport {
    pub run_id: Uuid,
    pub window: Window,
    pub root: String,
    pub results: Vec<ClaimResult>,
}

impl ClaimReport {
    fn count(&self, f: impl Fn(&ClaimOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.outcome)).count()
    }

    pub fn minted(&self) -> usize {
        self.count(|o| matches!(o, ClaimOutcome::Minted { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ClaimOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ClaimOutcome::Skipped | ClaimOutcome::Interrupted))
    }

    pub fn is_complete(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }
}

/// One network's ledger plus the local journal for that network
pub struct Relayer {
    network: String,
    ledger: Arc<dyn LedgerSource>,
    journal: Journal,
}

impl Relayer {
    pub fn new(network: impl Into<String>, ledger: Arc<dyn LedgerSource>, journal: Journal) -> Self {
        Self { network: network.into(), ledger, journal }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Window the next checkpoint on this network would cover
    pub async fn next_window(&self, tree_size: u64) -> Result<Window, DriverError> {
        let last = self.journal.last_window(&self.network).await?;
        Ok(next_window(last.as_ref(), tree_size)?)
    }

    /// Read `window` from the ledger once and commit it
    pub async fn build_window(&self, window: Window, cancel: &CancellationToken) -> Result<CommittedWindow, DriverError> {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriverError::Cancelled { window }),
            r = self.ledger.fetch_window(window) => r.map_err(|source| DriverError::Ledger { window, source })?,
        };

        let committed = CommittedWindow::build(window, &raw)?;
        if committed.window() != window {
            warn!(requested = %window, built = %committed.window(), "ledger ended inside window; truncated");
        }
        for c in committed.collisions() {
            warn!(leaf = %hex_root(&c.leaf), indices = ?c.leaf_indices, "identical award leaves in window");
        }
        Ok(committed)
    }

    /// Build the next contiguous checkpoint and post it.
    ///
    /// Contiguity with the journal is checked before the ledger is read.
    pub async fn publish_checkpoint(
        &self,
        store: Option<&dyn CheckpointStore>,
        req: PublishRequest,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, DriverError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("publish", %run_id, network = %self.network, tree_size = req.tree_size);
        self.publish_inner(store, req, cancel).instrument(span).await
    }

    async fn publish_inner(
        &self,
        store: Option<&dyn CheckpointStore>,
        req: PublishRequest,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, DriverError> {
        let store = match (store, req.dry_run) {
            (_, true) => None,
            (Some(s), false) => Some(s),
            (None, false) => return Err(DriverError::MissingEndpoint("checkpoint_store")),
        };
        if store.is_some() {
            if let Some(p) = self.journal.pending(&self.network).await?.into_iter().next() {
                return Err(DriverError::PendingCheckpoint { window: p.window, tx_hash: p.tx_hash });
            }
        }

        let last = self.journal.last_window(&self.network).await?;
        let requested = match req.starting_index {
            Some(start) => validate_window(
                last.as_ref(),
                Window { starting_index: start, tree_size: req.tree_size },
            )?,
            None => next_window(last.as_ref(), req.tree_size)?,
        };
        info!(window = %requested, dry_run = req.dry_run, "building checkpoint");

        let committed = self.build_window(requested, cancel).await?;
        let checkpoint = committed.checkpoint();
        let collisions = committed.collisions();
        info!(window = %checkpoint.window, root = %hex_root(&checkpoint.root), leaves = committed.len(), "checkpoint built");

        let Some(store) = store else {
            return Ok(PublishOutcome { requested, checkpoint, tx_hash: None, collisions });
        };

        let window = checkpoint.window;
        let tx_hash = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(window = %window, "cancelled while posting root; check the chain before retrying");
                return Err(DriverError::Cancelled { window });
            }
            r = store.submit_checkpoint(&checkpoint) => r.map_err(|source| DriverError::Chain { window, source })?,
        };

        let pending = JournalEntry::new(&self.network, &checkpoint, tx_hash.clone(), CheckpointStatus::Pending);
        self.journal.append(pending).await?;

        let confirmed = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(window = %window, tx_hash = %tx_hash, "cancelled while awaiting receipt; checkpoint left pending");
                return Err(DriverError::Cancelled { window });
            }
            r = store.confirm_checkpoint(&tx_hash) => r,
        };

        match confirmed {
            Ok(receipt) => {
                self.journal.set_status(&self.network, &tx_hash, CheckpointStatus::Confirmed).await?;
                info!(tx_hash = %tx_hash, window = %window, block = receipt.block_number, "checkpoint published");
                Ok(PublishOutcome { requested, checkpoint, tx_hash: Some(tx_hash), collisions })
            }
            Err(source @ ChainError::Reverted { .. }) => {
                self.journal.remove(&self.network, &tx_hash).await?;
                Err(DriverError::Chain { window, source })
            }
            Err(source) => {
                warn!(tx_hash = %tx_hash, window = %window, "receipt not seen; checkpoint left pending: {source}");
                Err(DriverError::Unconfirmed { window, tx_hash, source })
            }
        }
    }

    /// Settle every pending checkpoint on this network against the chain.
    ///
    /// Mined entries become confirmed, reverted ones are dropped so their
    /// window can be published again, and anything else stays pending.
    pub async fn reconcile(
        &self,
        store: &dyn CheckpointStore,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReconcileResult>, DriverError> {
        let span = info_span!("reconcile", network = %self.network);
        self.reconcile_inner(store, cancel).instrument(span).await
    }

    async fn reconcile_inner(
        &self,
        store: &dyn CheckpointStore,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReconcileResult>, DriverError> {
        let mut results = Vec::new();
        for entry in self.journal.pending(&self.network).await? {
            let window = entry.window;
            let confirmed = tokio::select! {
                _ = cancel.cancelled() => return Err(DriverError::Cancelled { window }),
                r = store.confirm_checkpoint(&entry.tx_hash) => r,
            };

            let outcome = match confirmed {
                Ok(receipt) => {
                    self.journal.set_status(&self.network, &entry.tx_hash, CheckpointStatus::Confirmed).await?;
                    info!(window = %window, tx_hash = %entry.tx_hash, "pending checkpoint confirmed");
                    ReconcileOutcome::Confirmed { block_number: receipt.block_number }
                }
                Err(ChainError::Reverted { .. }) => {
                    self.journal.remove(&self.network, &entry.tx_hash).await?;
                    warn!(window = %window, tx_hash = %entry.tx_hash, "pending checkpoint reverted; window released");
                    ReconcileOutcome::Reverted
                }
                Err(e) => {
                    warn!(window = %window, tx_hash = %entry.tx_hash, "still pending: {e}");
                    ReconcileOutcome::StillPending { reason: e.to_string() }
                }
            };
            results.push(ReconcileResult { window, tx_hash: entry.tx_hash, outcome });
        }
        Ok(results)
    }

    /// Rebuild a published window and mint each leaf in ascending order.
    ///
    /// A rejected mint is recorded and the loop continues; a fetch or build
    /// failure aborts before anything is sent.
    pub async fn drive_claims(
        &self,
        gateway: Option<&dyn MintGateway>,
        req: ClaimRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaimReport, DriverError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("unfurl", %run_id, network = %self.network, window = %req.window);
        self.claims_inner(run_id, gateway, req, cancel).instrument(span).await
    }

    async fn claims_inner(
        &self,
        run_id: Uuid,
        gateway: Option<&dyn MintGateway>,
        req: ClaimRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaimReport, DriverError> {
        let gateway = match (gateway, req.dry_run) {
            (_, true) => None,
            (Some(g), false) => Some(g),
            (None, false) => return Err(DriverError::MissingEndpoint("registry")),
        };

        let committed = self.build_window(req.window, cancel).await?;
        let root = committed.root();

        if let Some(expected) = req.expected_root {
            if expected != root {
                return Err(DriverError::StaleRoot {
                    window: committed.window(),
                    expected: hex_root(&expected),
                    rebuilt: hex_root(&root),
                });
            }
        }

        let len = committed.len();
        let out_of_range = |leaf_index| BadgeError::LeafOutOfRange { window: committed.window(), leaf_index };
        let leaf_indices: Vec<usize> = match req.only_leaf {
            Some(i) if i < len => vec![i],
            Some(i) => return Err(out_of_range(i).into()),
            None if req.from_leaf <= len => (req.from_leaf..len).collect(),
            None => return Err(out_of_range(req.from_leaf).into()),
        };

        info!(root = %hex_root(&root), claims = leaf_indices.len(), "minting");

        let mut results = Vec::with_capacity(leaf_indices.len());
        let mut stopped = false;

        for leaf_index in leaf_indices {
            let claim = committed.claim(leaf_index)?;
            let mut result = ClaimResult {
                leaf_index,
                ledger_index: claim.ledger_index,
                winner: claim.record.winner,
                badge_definition_number: claim.record.badge_definition_number,
                outcome: ClaimOutcome::Skipped,
            };

            if stopped || cancel.is_cancelled() {
                stopped = true;
                results.push(result);
                continue;
            }

            if !claim.verify(root) {
                warn!(leaf_index, "proof does not verify locally; not sending");
                result.outcome = ClaimOutcome::Failed { reason: "local proof verification failed".into() };
                results.push(result);
                continue;
            }

            result.outcome = match gateway {
                None => ClaimOutcome::Verified,
                Some(gateway) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        stopped = true;
                        warn!(leaf_index, "cancelled during mint; on-chain state unknown");
                        ClaimOutcome::Interrupted
                    }
                    r = gateway.mint(&claim, root) => match r {
                        Ok(tx_hash) => {
                            info!(leaf_index, ledger_index = claim.ledger_index, tx_hash = %tx_hash, "minted");
                            ClaimOutcome::Minted { tx_hash }
                        }
                        Err(e) => {
                            warn!(leaf_index, ledger_index = claim.ledger_index, winner = %claim.record.winner, "mint failed: {e}");
                            ClaimOutcome::Failed { reason: e.to_string() }
                        }
                    },
                },
            };
            results.push(result);
        }

        let report = ClaimReport {
            run_id,
            window: committed.window(),
            root: hex_root(&root),
            results,
        };
        info!(
            minted = report.minted(),
            failed = report.failed(),
            skipped = report.skipped(),
            "unfurl finished"
        );
        Ok(report)
    }
}
