//! HTTP routes configuration

use crate::api::handlers::{self, ApiState};
use crate::network::message::{ErrorResponse, ENDPOINT_ADD_PEER, ENDPOINT_STATUS, ENDPOINT_SYNC};
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Unknown routes answer with a JSON error like every other failure
async fn fallback_handler(uri: axum::http::Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("no route for {}", uri.path()),
        }),
    )
}

/// Create the router serving clients and peers
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Clients
        .route("/balances/list", get(handlers::list_balances))
        .route("/tx/add", post(handlers::add_tx))
        // Peers
        .route(ENDPOINT_STATUS, get(handlers::node_status))
        .route(ENDPOINT_SYNC, get(handlers::node_sync))
        .route(
            ENDPOINT_ADD_PEER,
            post(handlers::add_peer).get(handlers::add_peer),
        )
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}
