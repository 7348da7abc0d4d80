//! Read-only HTTP surface: checkpoints and proofs for ledger windows

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use badges::{Address, BadgeClaim, BadgeError, CommittedWindow, Window};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::driver::{hex_root, DriverError};
use crate::state::SharedState;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/network", get(get_network))
        .route("/windows/next", get(get_next_window))
        .route("/windows/:start/:size/checkpoint", get(get_checkpoint))
        .route("/windows/:start/:size/proofs", get(get_proofs))
        .route("/windows/:start/:size/proofs/:leaf", get(get_proof))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_status(e: &DriverError) -> StatusCode {
    match e {
        DriverError::Window(_) => StatusCode::BAD_REQUEST,
        DriverError::Badge(BadgeError::LeafOutOfRange { .. }) => StatusCode::NOT_FOUND,
        DriverError::Badge(BadgeError::Window(_)) => StatusCode::BAD_REQUEST,
        DriverError::Badge(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DriverError::Ledger { .. } | DriverError::Chain { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(e: DriverError) -> (StatusCode, String) {
    (error_status(&e), e.to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_network(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let net = &state.network;
    Json(serde_json::json!({
        "network": state.relayer.network(),
        "ledger_url": net.ledger_url,
        "checkpoint_store": net.checkpoint_store.as_ref().map(|e| &e.contract),
        "registry": net.registry.as_ref().map(|e| &e.contract),
    }))
}

#[derive(Deserialize)]
pub struct NextWindowQuery {
    pub size: u64,
}

async fn get_next_window(
    State(state): State<SharedState>,
    Query(q): Query<NextWindowQuery>,
) -> ApiResult<Window> {
    state.relayer.next_window(q.size).await.map(Json).map_err(reject)
}

#[derive(Serialize)]
pub struct CheckpointView {
    pub root: String,
    pub window: Window,
    pub leaf_count: usize,
    pub collisions: Vec<Vec<usize>>,
}

#[derive(Serialize)]
pub struct ClaimView {
    pub leaf_index: usize,
    pub ledger_index: u64,
    pub winner: Address,
    pub badge_definition_number: i8,
    pub global_badge_number: u64,
    pub leaf: String,
    pub proof: Vec<String>,
    pub positions: Vec<u8>,
    pub root: String,
}

impl ClaimView {
    fn new(claim: &BadgeClaim, root: &str) -> Self {
        Self {
            leaf_index: claim.leaf_index,
            ledger_index: claim.ledger_index,
            winner: claim.record.winner,
            badge_definition_number: claim.record.badge_definition_number,
            global_badge_number: claim.record.global_badge_number,
            leaf: hex_root(&claim.leaf),
            proof: claim.siblings().iter().map(hex_root).collect(),
            positions: claim.positions(),
            root: root.to_string(),
        }
    }
}

async fn committed(state: &SharedState, start: u64, size: u64) -> Result<CommittedWindow, (StatusCode, String)> {
    if size > state.max_window {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("window size {size} exceeds the API limit of {}", state.max_window),
        ));
    }
    let window = Window::new(start, size).map_err(|e| reject(e.into()))?;
    state
        .relayer
        .build_window(window, &CancellationToken::new())
        .await
        .map_err(reject)
}

async fn get_checkpoint(
    State(state): State<SharedState>,
    Path((start, size)): Path<(u64, u64)>,
) -> ApiResult<CheckpointView> {
    let cw = committed(&state, start, size).await?;
    Ok(Json(CheckpointView {
        root: hex_root(&cw.root()),
        window: cw.window(),
        leaf_count: cw.len(),
        collisions: cw.collisions().into_iter().map(|c| c.leaf_indices).collect(),
    }))
}

async fn get_proofs(
    State(state): State<SharedState>,
    Path((start, size)): Path<(u64, u64)>,
) -> ApiResult<Vec<ClaimView>> {
    let cw = committed(&state, start, size).await?;
    let root = hex_root(&cw.root());
    let claims = cw.claims().map_err(|e| reject(e.into()))?;
    Ok(Json(claims.iter().map(|c| ClaimView::new(c, &root)).collect()))
}

async fn get_proof(
    State(state): State<SharedState>,
    Path((start, size, leaf)): Path<(u64, u64, usize)>,
) -> ApiResult<ClaimView> {
    let cw = committed(&state, start, size).await?;
    let root = hex_root(&cw.root());
    let claim = cw.claim(leaf).map_err(|e| reject(e.into()))?;
    Ok(Json(ClaimView::new(&claim, &root)))
}
