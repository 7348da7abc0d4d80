use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use badges::{build_checkpoint, Address, BadgeClaim, BadgeError, Checkpoint, RawBadgeAward, Window, WindowError};
use merkle::Hash32;
use relayer::chain::{CheckpointStore, MintGateway};
use relayer::config::NetworkConfig;
use relayer::driver::{
    hex_root, ClaimOutcome, ClaimRequest, DriverError, PublishRequest, ReconcileOutcome, Relayer,
};
use relayer::journal::Journal;
use relayer::ledger::{LedgerError, LedgerSource};
use relayer::rpc::{ChainError, Receipt, TxHash};
use relayer::state::AppState;
use tokio_util::sync::CancellationToken;

// --- fakes ---

struct FakeLedger {
    rows: Vec<RawBadgeAward>,
    calls: AtomicUsize,
}

impl FakeLedger {
    fn with_awards(count: u64) -> Arc<Self> {
        let rows = (0..count)
            .map(|i| RawBadgeAward {
                winner: Address([i as u8 + 1; 20]).to_hex(),
                badge_definition_number: (i % 5) as i64,
                global_badge_number: i,
            })
            .collect();
        Arc::new(Self { rows, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerSource for FakeLedger {
    async fn fetch_window(&self, window: Window) -> Result<Vec<RawBadgeAward>, LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .iter()
            .skip(window.starting_index as usize)
            .take(window.tree_size as usize)
            .cloned()
            .collect())
    }
}

struct DownLedger;

#[async_trait]
impl LedgerSource for DownLedger {
    async fn fetch_window(&self, _: Window) -> Result<Vec<RawBadgeAward>, LedgerError> {
        Err(LedgerError::Http { status: 503 })
    }
}

#[derive(Clone, Copy, Debug, Default)]
enum Receipts {
    #[default]
    Mined,
    Reverted,
    Missing,
}

#[derive(Default)]
struct RecordingStore {
    posted: Mutex<Vec<Checkpoint>>,
    reject_submit: bool,
    receipts: Mutex<Receipts>,
}

impl RecordingStore {
    fn with_receipts(receipts: Receipts) -> Self {
        Self { receipts: Mutex::new(receipts), ..Default::default() }
    }

    fn set_receipts(&self, receipts: Receipts) {
        *self.receipts.lock().unwrap() = receipts;
    }
}

#[async_trait]
impl CheckpointStore for RecordingStore {
    async fn submit_checkpoint(&self, checkpoint: &Checkpoint) -> Result<TxHash, ChainError> {
        if self.reject_submit {
            return Err(ChainError::Rpc { code: -32000, message: "execution reverted: root already posted".into() });
        }
        let mut posted = self.posted.lock().unwrap();
        posted.push(*checkpoint);
        Ok(format!("0xpost{}", posted.len()))
    }

    async fn confirm_checkpoint(&self, tx_hash: &str) -> Result<Receipt, ChainError> {
        let receipts = *self.receipts.lock().unwrap();
        match receipts {
            Receipts::Mined => Ok(Receipt { block_number: 7 }),
            Receipts::Reverted => Err(ChainError::Reverted { tx_hash: tx_hash.to_string() }),
            Receipts::Missing => Err(ChainError::Unconfirmed { tx_hash: tx_hash.to_string(), polls: 3 }),
        }
    }
}

#[derive(Default)]
struct FakeRegistry {
    reject: HashSet<usize>,
    cancel_on: Option<(usize, CancellationToken)>,
    minted: Mutex<Vec<usize>>,
}

#[async_trait]
impl MintGateway for FakeRegistry {
    async fn mint(&self, claim: &BadgeClaim, root: Hash32) -> Result<TxHash, ChainError> {
        assert!(claim.verify(root), "driver sent an unverifiable claim");
        if let Some((leaf, token)) = &self.cancel_on {
            if *leaf == claim.leaf_index {
                token.cancel();
            }
        }
        if self.reject.contains(&claim.leaf_index) {
            return Err(ChainError::Reverted { tx_hash: format!("0xbad{}", claim.leaf_index) });
        }
        self.minted.lock().unwrap().push(claim.leaf_index);
        Ok(format!("0xmint{}", claim.leaf_index))
    }
}

fn relayer_with(ledger: Arc<dyn LedgerSource>, dir: &tempfile::TempDir) -> Relayer {
    Relayer::new("hardhat", ledger, Journal::new(dir.path().join("journal.json")))
}

fn publish(size: u64, start: Option<u64>) -> PublishRequest {
    PublishRequest { tree_size: size, starting_index: start, dry_run: false }
}

fn claims(window: Window) -> ClaimRequest {
    ClaimRequest { window, expected_root: None, from_leaf: 0, only_leaf: None, dry_run: false }
}

// --- publishing ---

#[tokio::test]
async fn test_publish_chains_windows_through_journal() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FakeLedger::with_awards(20);
    let relayer = relayer_with(ledger.clone(), &dir);
    let store = RecordingStore::default();
    let cancel = CancellationToken::new();

    let mut got = Vec::new();
    for size in [4, 6, 3] {
        let out = relayer.publish_checkpoint(Some(&store), publish(size, None), &cancel).await.unwrap();
        got.push((out.checkpoint.window.starting_index, out.checkpoint.window.tree_size));
        assert!(out.tx_hash.is_some());
    }
    assert_eq!(got, vec![(0, 4), (4, 6), (10, 3)]);

    let posted = store.posted.lock().unwrap().clone();
    assert_eq!(posted.len(), 3);
    let expected = build_checkpoint(Window::new(4, 6).unwrap(), &ledger.rows[4..10]).unwrap();
    assert_eq!(posted[1], expected);

    assert_eq!(relayer.next_window(5).await.unwrap(), Window::new(13, 5).unwrap());
    assert_eq!(relayer.journal().entries().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_out_of_sequence_publish_rejected_before_any_io() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FakeLedger::with_awards(20);
    let relayer = relayer_with(ledger.clone(), &dir);
    let store = RecordingStore::default();
    let cancel = CancellationToken::new();

    relayer.publish_checkpoint(Some(&store), publish(4, Some(0)), &cancel).await.unwrap();
    assert_eq!(ledger.calls(), 1);

    for start in [0, 3, 5] {
        let err = relayer
            .publish_checkpoint(Some(&store), publish(2, Some(start)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Window(WindowError::NotContiguous { expected: 4, .. })));
    }
    assert_eq!(ledger.calls(), 1);
    assert_eq!(store.posted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dry_run_posts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(8), &dir);
    let cancel = CancellationToken::new();

    let req = PublishRequest { tree_size: 8, starting_index: None, dry_run: true };
    let out = relayer.publish_checkpoint(None, req, &cancel).await.unwrap();
    assert_eq!(out.tx_hash, None);
    assert!(relayer.journal().entries().await.unwrap().is_empty());

    let err = relayer.publish_checkpoint(None, publish(8, None), &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::MissingEndpoint("checkpoint_store")));
}

#[tokio::test]
async fn test_short_final_window_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(6), &dir);
    let store = RecordingStore::default();
    let cancel = CancellationToken::new();

    relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap();
    let out = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap();

    assert_eq!(out.requested, Window::new(4, 4).unwrap());
    assert_eq!(out.checkpoint.window, Window::new(4, 2).unwrap());
    assert_eq!(relayer.next_window(1).await.unwrap().starting_index, 6);

    // nothing left
    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Badge(BadgeError::EmptyLedgerWindow { .. })));
}

#[tokio::test]
async fn test_rejected_publish_leaves_journal_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(8), &dir);
    let store = RecordingStore { reject_submit: true, ..Default::default() };
    let cancel = CancellationToken::new();

    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    assert!(matches!(
        &err,
        DriverError::Chain { window, source: ChainError::Rpc { code: -32000, .. } } if *window == Window::new(0, 4).unwrap()
    ));
    assert!(err.to_string().contains("[0, 4)"), "{err}");
    assert!(relayer.journal().entries().await.unwrap().is_empty());
    assert_eq!(relayer.next_window(4).await.unwrap(), Window::new(0, 4).unwrap());
}

#[tokio::test]
async fn test_unconfirmed_publish_blocks_until_reconciled() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(12), &dir);
    let store = RecordingStore::with_receipts(Receipts::Missing);
    let cancel = CancellationToken::new();

    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    match &err {
        DriverError::Unconfirmed { window, tx_hash, .. } => {
            assert_eq!(*window, Window::new(0, 4).unwrap());
            assert_eq!(tx_hash, "0xpost1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("[0, 4)"), "{err}");

    // the sent window stays taken
    assert_eq!(relayer.next_window(4).await.unwrap(), Window::new(4, 4).unwrap());
    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    assert!(matches!(&err, DriverError::PendingCheckpoint { tx_hash, .. } if tx_hash == "0xpost1"));
    assert_eq!(store.posted.lock().unwrap().len(), 1);

    // still not mined: nothing changes
    let results = relayer.reconcile(&store, &cancel).await.unwrap();
    assert!(matches!(results[0].outcome, ReconcileOutcome::StillPending { .. }));
    assert_eq!(relayer.journal().pending("hardhat").await.unwrap().len(), 1);

    store.set_receipts(Receipts::Mined);
    let results = relayer.reconcile(&store, &cancel).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, ReconcileOutcome::Confirmed { block_number: 7 });
    assert!(relayer.journal().pending("hardhat").await.unwrap().is_empty());

    let out = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap();
    assert_eq!(out.checkpoint.window, Window::new(4, 4).unwrap());
}

#[tokio::test]
async fn test_reverted_checkpoint_releases_window() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(8), &dir);
    let cancel = CancellationToken::new();

    let store = RecordingStore::with_receipts(Receipts::Reverted);
    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Chain { source: ChainError::Reverted { .. }, .. }));
    assert!(relayer.journal().entries().await.unwrap().is_empty());

    let store = RecordingStore::with_receipts(Receipts::Missing);
    relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    store.set_receipts(Receipts::Reverted);
    let results = relayer.reconcile(&store, &cancel).await.unwrap();
    assert_eq!(results[0].outcome, ReconcileOutcome::Reverted);
    assert_eq!(relayer.next_window(4).await.unwrap(), Window::new(0, 4).unwrap());
}

#[tokio::test]
async fn test_cancelled_publish_names_window() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FakeLedger::with_awards(8);
    let relayer = relayer_with(ledger.clone(), &dir);
    let store = RecordingStore::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Cancelled { window } if window == Window::new(0, 4).unwrap()));
    assert_eq!(err.to_string(), "window [0, 4): cancelled");
    assert_eq!(ledger.calls(), 0);
}

// --- claims ---

#[tokio::test]
async fn test_unfurl_mints_every_leaf_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FakeLedger::with_awards(7);
    let relayer = relayer_with(ledger.clone(), &dir);
    let registry = FakeRegistry::default();
    let window = Window::new(0, 7).unwrap();
    let root = build_checkpoint(window, &ledger.rows).unwrap().root;

    let req = ClaimRequest { expected_root: Some(root), ..claims(window) };
    let report = relayer.drive_claims(Some(&registry), req, &CancellationToken::new()).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.minted(), 7);
    assert_eq!(report.root, hex_root(&root));
    assert_eq!(*registry.minted.lock().unwrap(), (0..7).collect::<Vec<_>>());
    assert_eq!(ledger.calls(), 1);
}

#[tokio::test]
async fn test_rejected_mint_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(4), &dir);
    let registry = FakeRegistry { reject: HashSet::from([1]), ..Default::default() };

    let report = relayer
        .drive_claims(Some(&registry), claims(Window::new(0, 4).unwrap()), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.minted(), 3);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_complete());
    assert!(matches!(&report.results[1].outcome, ClaimOutcome::Failed { reason } if reason.contains("0xbad1")));
    assert_eq!(*registry.minted.lock().unwrap(), vec![0, 2, 3]);
}

#[tokio::test]
async fn test_stale_root_mints_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(4), &dir);
    let registry = FakeRegistry::default();

    let req = ClaimRequest { expected_root: Some([9; 32]), ..claims(Window::new(0, 4).unwrap()) };
    let err = relayer.drive_claims(Some(&registry), req, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, DriverError::StaleRoot { .. }));
    assert!(registry.minted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_and_single_leaf() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(5), &dir);
    let window = Window::new(0, 5).unwrap();
    let cancel = CancellationToken::new();

    let registry = FakeRegistry::default();
    let req = ClaimRequest { from_leaf: 3, ..claims(window) };
    relayer.drive_claims(Some(&registry), req, &cancel).await.unwrap();
    assert_eq!(*registry.minted.lock().unwrap(), vec![3, 4]);

    let registry = FakeRegistry::default();
    let req = ClaimRequest { only_leaf: Some(2), ..claims(window) };
    let report = relayer.drive_claims(Some(&registry), req, &cancel).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].ledger_index, 2);
    assert_eq!(*registry.minted.lock().unwrap(), vec![2]);

    let req = ClaimRequest { only_leaf: Some(5), ..claims(window) };
    let err = relayer.drive_claims(Some(&registry), req, &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Badge(BadgeError::LeafOutOfRange { leaf_index: 5, .. })));
}

#[tokio::test]
async fn test_cancellation_skips_remaining_leaves() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(4), &dir);
    let cancel = CancellationToken::new();
    let registry = FakeRegistry { cancel_on: Some((1, cancel.clone())), ..Default::default() };

    let report = relayer
        .drive_claims(Some(&registry), claims(Window::new(0, 4).unwrap()), &cancel)
        .await
        .unwrap();

    assert_eq!(report.minted(), 2);
    assert_eq!(report.skipped(), 2);
    assert_eq!(report.results[2].outcome, ClaimOutcome::Skipped);
    assert_eq!(report.results[3].outcome, ClaimOutcome::Skipped);
}

#[tokio::test]
async fn test_dry_run_unfurl_verifies_without_sending() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(FakeLedger::with_awards(3), &dir);

    let req = ClaimRequest { dry_run: true, ..claims(Window::new(0, 3).unwrap()) };
    let report = relayer.drive_claims(None, req, &CancellationToken::new()).await.unwrap();
    assert!(report.results.iter().all(|r| r.outcome == ClaimOutcome::Verified));
}

#[tokio::test]
async fn test_ledger_failure_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let relayer = relayer_with(Arc::new(DownLedger), &dir);
    let registry = FakeRegistry::default();
    let store = RecordingStore::default();
    let cancel = CancellationToken::new();

    let err = relayer.drive_claims(Some(&registry), claims(Window::new(0, 2).unwrap()), &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Ledger { .. }));

    let err = relayer.publish_checkpoint(Some(&store), publish(4, None), &cancel).await.unwrap_err();
    assert!(matches!(err, DriverError::Ledger { window, .. } if window == Window::new(0, 4).unwrap()));
    assert!(err.to_string().starts_with("window [0, 4): ledger fetch failed"), "{err}");
    assert!(store.posted.lock().unwrap().is_empty());
    assert!(relayer.journal().entries().await.unwrap().is_empty());
}

// --- http api ---

const API_MAX_WINDOW: u64 = 100;

async fn spawn_api(ledger: Arc<dyn LedgerSource>, dir: &tempfile::TempDir) -> String {
    let network = NetworkConfig {
        ledger_url: "http://ledger.invalid".into(),
        checkpoint_store: None,
        registry: None,
    };
    let state = Arc::new(AppState::new(network, relayer_with(ledger, dir), API_MAX_WINDOW));
    let app = relayer::routes::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_api_checkpoint_and_proofs() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FakeLedger::with_awards(5);
    let base = spawn_api(ledger.clone(), &dir).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client.get(format!("{base}/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let network: serde_json::Value = client.get(format!("{base}/network")).send().await.unwrap().json().await.unwrap();
    assert_eq!(network["network"], "hardhat");

    let expected = build_checkpoint(Window::new(0, 5).unwrap(), &ledger.rows).unwrap();
    let cp: serde_json::Value = client
        .get(format!("{base}/windows/0/5/checkpoint"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cp["root"], hex_root(&expected.root));
    assert_eq!(cp["leaf_count"], 5);

    let proofs: Vec<serde_json::Value> = client
        .get(format!("{base}/windows/0/5/proofs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(proofs.len(), 5);

    let one: serde_json::Value = client
        .get(format!("{base}/windows/0/5/proofs/4"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one, proofs[4]);
    assert_eq!(one["ledger_index"], 4);
    assert_eq!(one["root"], hex_root(&expected.root));

    let next: serde_json::Value = client
        .get(format!("{base}/windows/next?size=3"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(next, serde_json::json!({ "starting_index": 0, "tree_size": 3 }));
}

#[tokio::test]
async fn test_api_error_statuses() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = FakeLedger::with_awards(3);
    let base = spawn_api(ledger.clone(), &dir).await;
    let client = reqwest::Client::new();

    let status = |path: &'static str| {
        let client = client.clone();
        let url = format!("{base}{path}");
        async move { client.get(url).send().await.unwrap().status().as_u16() }
    };

    assert_eq!(status("/windows/0/3/proofs/3").await, 404);
    assert_eq!(status("/windows/0/0/checkpoint").await, 400);
    assert_eq!(status("/windows/10/3/checkpoint").await, 422);

    let calls = ledger.calls();
    assert_eq!(status("/windows/0/101/proofs").await, 400);
    assert_eq!(status("/windows/0/100/checkpoint").await, 200);
    assert_eq!(ledger.calls(), calls + 1);

    let down = tempfile::tempdir().unwrap();
    let down_base = spawn_api(Arc::new(DownLedger), &down).await;
    let resp = client.get(format!("{down_base}/windows/0/3/checkpoint")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 502);
}
