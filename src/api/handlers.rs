//! HTTP handlers for clients and peers

use crate::core::{Account, LedgerError, Transaction};
use crate::crypto::Hash;
use crate::network::message::{
    AddPeerResponse, ErrorResponse, StatusResponse, SyncResponse,
    ENDPOINT_ADD_PEER_QUERY_KEY_IP, ENDPOINT_ADD_PEER_QUERY_KEY_PORT,
    ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK,
};
use crate::network::node::SharedState;
use crate::network::peer::PeerNode;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub state: SharedState,
}

impl ApiState {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn ledger_error(e: LedgerError) -> ApiError {
    let status = if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct BalancesResponse {
    pub block_hash: Hash,
    pub balances: BTreeMap<Account, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxAddRequest {
    pub from: Account,
    pub to: Account,
    pub value: u64,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxAddResponse {
    pub block_hash: Hash,
}

// ============================================================================
// Client Handlers
// ============================================================================

/// GET /balances/list
pub async fn list_balances(State(api): State<ApiState>) -> Json<BalancesResponse> {
    let state = api.state.read().await;

    Json(BalancesResponse {
        block_hash: state.ledger.latest_hash(),
        balances: state.ledger.balances().clone(),
    })
}

/// POST /tx/add - queue the transaction and persist it as a new block
pub async fn add_tx(
    State(api): State<ApiState>,
    body: Result<Json<TxAddRequest>, JsonRejection>,
) -> Result<Json<TxAddResponse>, ApiError> {
    let Json(request) = body.map_err(|e| error_response(StatusCode::BAD_REQUEST, e.body_text()))?;
    let tx = Transaction::new(request.from, request.to, request.value, request.data);

    let mut state = api.state.write().await;
    let block_hash = state.ledger.commit_transaction(tx).map_err(ledger_error)?;

    Ok(Json(TxAddResponse { block_hash }))
}

// ============================================================================
// Peer Handlers
// ============================================================================

/// GET /node/status
pub async fn node_status(State(api): State<ApiState>) -> Json<StatusResponse> {
    let state = api.state.read().await;

    Json(StatusResponse {
        block_hash: state.ledger.latest_hash(),
        block_number: state.ledger.latest_number(),
        peers_known: state.peers.all(),
    })
}

/// GET /node/sync?fromBlock=<hash> - every block after `fromBlock`
pub async fn node_sync(
    State(api): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SyncResponse>, ApiError> {
    let from = match params.get(ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<Hash>()
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?,
        _ => Hash::zero(),
    };

    let state = api.state.read().await;
    let blocks = state.ledger.blocks_after(&from).map_err(ledger_error)?;

    Ok(Json(SyncResponse { blocks }))
}

/// POST /node/peer?ip=<ip>&port=<port> - register the caller as a peer
pub async fn add_peer(
    State(api): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<AddPeerResponse> {
    let peer = match parse_peer(&params) {
        Ok(peer) => peer,
        Err(error) => {
            return Json(AddPeerResponse {
                success: false,
                error,
            })
        }
    };

    let address = peer.tcp_address();
    let mut state = api.state.write().await;
    if !state.peers.is_known(&peer) {
        log::info!("Peer '{}' was added into known peers", address);
    }
    state.peers.add(peer);

    Json(AddPeerResponse {
        success: true,
        error: String::new(),
    })
}

fn parse_peer(params: &HashMap<String, String>) -> Result<PeerNode, String> {
    let ip = params
        .get(ENDPOINT_ADD_PEER_QUERY_KEY_IP)
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| "missing peer ip".to_string())?;

    let port = params
        .get(ENDPOINT_ADD_PEER_QUERY_KEY_PORT)
        .ok_or_else(|| "missing peer port".to_string())?
        .parse::<u16>()
        .map_err(|e| format!("invalid peer port: {}", e))?;

    // The caller has registered with us, so no join is needed in return
    Ok(PeerNode::new(ip.clone(), port, false, true))
}
