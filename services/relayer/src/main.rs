use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use merkle::Hash32;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relayer::chain::{CheckpointStore, EvmBadgeRegistry, EvmCheckpointStore, MintGateway};
use relayer::config::{AppConfig, NetworkConfig, NetworkTable};
use relayer::driver::{hex_root, ClaimRequest, PublishRequest, Relayer};
use relayer::journal::Journal;
use relayer::ledger::SubgraphLedger;
use relayer::retry::RetryPolicy;
use relayer::routes;
use relayer::state::AppState;

#[derive(Parser)]
#[command(name = "relayer", about = "Badge award checkpoint relayer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the next ledger window and post its root
    PostRoot {
        /// Number of awards in the window
        #[arg(long)]
        size: u64,
        /// Explicit starting index (must follow the last posted window)
        #[arg(long)]
        start: Option<u64>,
        /// Build and print the root without posting
        #[arg(long)]
        dry_run: bool,
    },
    /// Mint every badge of a posted window
    Unfurl {
        #[arg(long)]
        start: u64,
        #[arg(long)]
        size: u64,
        /// Root the window was posted with; minting stops if the rebuild differs
        #[arg(long)]
        root: Option<String>,
        /// Resume from this leaf
        #[arg(long, default_value_t = 0)]
        from_leaf: usize,
        /// Mint a single leaf
        #[arg(long, conflicts_with = "from_leaf")]
        leaf: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Settle checkpoints whose receipt was never seen
    Reconcile,
    /// Print the window the next post-root would cover
    NextWindow {
        #[arg(long)]
        size: u64,
    },
    /// Print the selected network's endpoints
    ShowNetwork,
    /// Serve the read-only checkpoint/proof API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::from_env()?;
    let network = NetworkTable::load(&cfg.networks_file)?.select(&cfg.network)?;
    let policy = RetryPolicy::with_timeout(cfg.request_timeout);

    let ledger = Arc::new(SubgraphLedger::new(&network.ledger_url, cfg.ledger_page_size, policy));
    let relayer = Relayer::new(&cfg.network, ledger, Journal::new(&cfg.journal_path));
    info!(network = %cfg.network, ledger = %network.ledger_url, "relayer: configured");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current call");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::PostRoot { size, start, dry_run } => {
            post_root(&cfg, &network, &relayer, policy, size, start, dry_run, &cancel).await
        }
        Command::Unfurl { start, size, root, from_leaf, leaf, dry_run } => {
            let window = badges::Window::new(start, size)?;
            let expected_root = root.as_deref().map(parse_root).transpose()?;
            let req = ClaimRequest { window, expected_root, from_leaf, only_leaf: leaf, dry_run };
            unfurl(&cfg, &network, &relayer, policy, req, &cancel).await
        }
        Command::Reconcile => {
            let store = EvmCheckpointStore::new(network.checkpoint_store(&cfg.network)?, policy);
            let results = relayer.reconcile(&store, &cancel).await.context("reconcile failed")?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Command::NextWindow { size } => {
            let w = relayer.next_window(size).await?;
            println!("{}", serde_json::to_string_pretty(&w)?);
            Ok(())
        }
        Command::ShowNetwork => {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "network": cfg.network, "config": network }))?);
            Ok(())
        }
        Command::Serve => serve(&cfg, network, relayer).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn post_root(
    cfg: &AppConfig,
    network: &NetworkConfig,
    relayer: &Relayer,
    policy: RetryPolicy,
    size: u64,
    start: Option<u64>,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let store = if dry_run {
        None
    } else {
        Some(EvmCheckpointStore::new(network.checkpoint_store(&cfg.network)?, policy))
    };

    let req = PublishRequest { tree_size: size, starting_index: start, dry_run };
    let out = relayer
        .publish_checkpoint(store.as_ref().map(|s| s as &dyn CheckpointStore), req, cancel)
        .await
        .context("post-root failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "root": hex_root(&out.checkpoint.root),
            "starting_index": out.checkpoint.window.starting_index,
            "tree_size": out.checkpoint.window.tree_size,
            "requested_size": out.requested.tree_size,
            "tx_hash": out.tx_hash,
            "collisions": out.collisions.iter().map(|c| &c.leaf_indices).collect::<Vec<_>>(),
        }))?
    );
    Ok(())
}

async fn unfurl(
    cfg: &AppConfig,
    network: &NetworkConfig,
    relayer: &Relayer,
    policy: RetryPolicy,
    req: ClaimRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    let gateway = if req.dry_run {
        None
    } else {
        Some(EvmBadgeRegistry::new(network.registry(&cfg.network)?, policy))
    };

    let report = relayer
        .drive_claims(gateway.as_ref().map(|g| g as &dyn MintGateway), req, cancel)
        .await
        .context("unfurl failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_complete() {
        bail!(
            "{} minted, {} failed, {} not attempted",
            report.minted(),
            report.failed(),
            report.skipped()
        );
    }
    Ok(())
}

async fn serve(cfg: &AppConfig, network: NetworkConfig, relayer: Relayer) -> Result<()> {
    let state = Arc::new(AppState::new(network, relayer, cfg.api_max_window));
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.bind_addr))?;
    info!(addr = %cfg.bind_addr, "relayer api listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn parse_root(s: &str) -> Result<Hash32> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).with_context(|| format!("root is not hex: {s}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("root must be 32 bytes, got {}", b.len()))
}
