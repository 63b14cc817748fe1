//! Peer networking module
//!
//! Nodes replicate the ledger by polling each other over HTTP.
//!
//! # Features
//! - Peer registry seeded from a bootstrap node
//! - Status exchange and peer discovery
//! - Block catch-up with full re-validation
//! - Background sync rounds with cooperative cancellation

pub mod client;
pub mod message;
pub mod node;
pub mod peer;
pub mod sync;

pub use client::{PeerClient, PeerError, DEFAULT_REQUEST_TIMEOUT};
pub use message::{
    AddPeerResponse, ErrorResponse, StatusResponse, SyncResponse, ENDPOINT_ADD_PEER,
    ENDPOINT_STATUS, ENDPOINT_SYNC,
};
pub use node::{Node, NodeConfig, NodeError, NodeState, SharedState};
pub use peer::{PeerNode, PeerRegistry};
pub use sync::{blocks_ahead, SyncEngine, SyncError, SyncReport, DEFAULT_SYNC_INTERVAL};
