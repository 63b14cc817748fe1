//! HTTP API module
//!
//! # Endpoints
//!
//! ## Clients
//! - `GET /balances/list` - Committed balances at the latest block
//! - `POST /tx/add` - Submit a transaction and persist it as a block
//!
//! ## Peers
//! - `GET /node/status` - Latest block and known peers
//! - `GET /node/sync?fromBlock=<hash>` - Blocks after a hash
//! - `POST /node/peer?ip=<ip>&port=<port>` - Register the caller as a peer

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
