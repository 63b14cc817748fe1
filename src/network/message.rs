//! Inter-node wire messages
//!
//! Field names here are part of the protocol between nodes and must not
//! change.

use crate::core::Block;
use crate::crypto::Hash;
use crate::network::peer::PeerNode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const ENDPOINT_STATUS: &str = "/node/status";
pub const ENDPOINT_SYNC: &str = "/node/sync";
pub const ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK: &str = "fromBlock";
pub const ENDPOINT_ADD_PEER: &str = "/node/peer";
pub const ENDPOINT_ADD_PEER_QUERY_KEY_IP: &str = "ip";
pub const ENDPOINT_ADD_PEER_QUERY_KEY_PORT: &str = "port";

/// `GET /node/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub block_hash: Hash,
    pub block_number: u64,
    #[serde(default)]
    pub peers_known: HashMap<String, PeerNode>,
}

/// `GET /node/sync?fromBlock=<hash>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub blocks: Vec<Block>,
}

/// `POST /node/peer?ip=<ip>&port=<port>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPeerResponse {
    pub success: bool,
    #[serde(default)]
    pub error: String,
}

/// Error body returned by every endpoint on failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
