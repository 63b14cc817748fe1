//! Outbound HTTP calls to peers
//!
//! The sync engine is the only user of this client.

use crate::core::Block;
use crate::crypto::Hash;
use crate::network::message::{
    AddPeerResponse, ErrorResponse, StatusResponse, SyncResponse, ENDPOINT_ADD_PEER,
    ENDPOINT_ADD_PEER_QUERY_KEY_IP, ENDPOINT_ADD_PEER_QUERY_KEY_PORT, ENDPOINT_STATUS,
    ENDPOINT_SYNC, ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK,
};
use crate::network::peer::PeerNode;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

/// Default timeout for a single peer request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Peer communication errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to decode peer response: {0}")]
    Decode(String),
    #[error("Peer rejected request: {0}")]
    Rejected(String),
}

/// HTTP client for the node protocol
#[derive(Clone)]
pub struct PeerClient {
    client: Client,
}

impl PeerClient {
    /// Create a client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .build()?;

        Ok(Self { client })
    }

    fn url(peer: &PeerNode, endpoint: &str) -> String {
        format!("http://{}{}", peer.tcp_address(), endpoint)
    }

    /// Fetch the peer's latest block and known peers
    pub async fn status(&self, peer: &PeerNode) -> Result<StatusResponse, PeerError> {
        let response = self
            .client
            .get(Self::url(peer, ENDPOINT_STATUS))
            .send()
            .await?;

        read_json(response).await
    }

    /// Ask the peer to register this node as one of its peers
    pub async fn join(&self, peer: &PeerNode, local_ip: &str, local_port: u16) -> Result<(), PeerError> {
        let response = self
            .client
            .post(Self::url(peer, ENDPOINT_ADD_PEER))
            .query(&[
                (ENDPOINT_ADD_PEER_QUERY_KEY_IP, local_ip.to_string()),
                (ENDPOINT_ADD_PEER_QUERY_KEY_PORT, local_port.to_string()),
            ])
            .send()
            .await?;

        let body = response.bytes().await?;
        let answer: AddPeerResponse =
            serde_json::from_slice(&body).map_err(|e| PeerError::Decode(e.to_string()))?;

        if !answer.error.is_empty() {
            return Err(PeerError::Rejected(answer.error));
        }
        if !answer.success {
            return Err(PeerError::Rejected(format!(
                "unable to join known peers of '{}'",
                peer.tcp_address()
            )));
        }

        Ok(())
    }

    /// Fetch every block the peer stores after `from`
    pub async fn fetch_blocks(&self, peer: &PeerNode, from: &Hash) -> Result<Vec<Block>, PeerError> {
        log::info!("Importing blocks from peer {}...", peer.tcp_address());

        let response = self
            .client
            .get(Self::url(peer, ENDPOINT_SYNC))
            .query(&[(ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK, from.to_hex())])
            .send()
            .await?;

        let sync: SyncResponse = read_json(response).await?;
        Ok(sync.blocks)
    }
}

/// Decode a JSON body, turning non-success statuses into `Rejected`
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, PeerError> {
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let reason = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("HTTP {}", status));
        return Err(PeerError::Rejected(reason));
    }

    serde_json::from_slice(&body).map_err(|e| PeerError::Decode(e.to_string()))
}
