//! Peer registry
//!
//! Tracks the peer endpoints this node knows about, keyed by `ip:port`.
//! The registry is plain data; callers serialise access through the node's
//! shared state lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A remote node endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub ip: String,
    pub port: u16,
    pub is_bootstrap: bool,
    /// Whether this node has registered itself with the peer. Local only.
    #[serde(skip)]
    pub connected: bool,
}

impl PeerNode {
    pub fn new(ip: impl Into<String>, port: u16, is_bootstrap: bool, connected: bool) -> Self {
        Self {
            ip: ip.into(),
            port,
            is_bootstrap,
            connected,
        }
    }

    /// The registry key and HTTP authority of this peer
    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Known peers of the local node
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    local_ip: String,
    local_port: u16,
    peers: HashMap<String, PeerNode>,
}

impl PeerRegistry {
    /// Create a registry for the node listening on `local_ip:local_port`
    pub fn new(local_ip: impl Into<String>, local_port: u16) -> Self {
        Self {
            local_ip: local_ip.into(),
            local_port,
            peers: HashMap::new(),
        }
    }

    /// Create a registry seeded with a bootstrap peer
    pub fn with_bootstrap(local_ip: impl Into<String>, local_port: u16, bootstrap: PeerNode) -> Self {
        let mut registry = Self::new(local_ip, local_port);
        registry.add(bootstrap);
        registry
    }

    /// Insert or replace a peer
    pub fn add(&mut self, peer: PeerNode) {
        self.peers.insert(peer.tcp_address(), peer);
    }

    /// Remove a peer, returning it if it was known
    pub fn remove(&mut self, peer: &PeerNode) -> Option<PeerNode> {
        self.peers.remove(&peer.tcp_address())
    }

    /// Whether `peer` is the local node itself
    pub fn is_local(&self, peer: &PeerNode) -> bool {
        peer.ip == self.local_ip && peer.port == self.local_port
    }

    /// Known peers include the local node, so it never syncs with itself
    pub fn is_known(&self, peer: &PeerNode) -> bool {
        self.is_local(peer) || self.peers.contains_key(&peer.tcp_address())
    }

    pub fn get(&self, address: &str) -> Option<&PeerNode> {
        self.peers.get(address)
    }

    /// Record a successful join. Returns false if the peer is no longer known.
    pub fn mark_connected(&mut self, address: &str) -> bool {
        match self.peers.get_mut(address) {
            Some(peer) => {
                peer.connected = true;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all known peers
    pub fn all(&self) -> HashMap<String, PeerNode> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
