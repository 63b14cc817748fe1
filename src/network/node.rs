//! Node implementation
//!
//! The node owns the ledger and the peer registry behind a single lock,
//! serves the HTTP API and runs the sync engine in the background.

use crate::api::{create_router, ApiState};
use crate::core::{Ledger, LedgerError};
use crate::network::client::{PeerClient, PeerError, DEFAULT_REQUEST_TIMEOUT};
use crate::network::peer::{PeerNode, PeerRegistry};
use crate::network::sync::{SyncEngine, DEFAULT_SYNC_INTERVAL};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_IP: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Node errors. Only start-up failures are fatal.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Peer client error: {0}")]
    Peer(#[from] PeerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory holding `database/`
    pub data_dir: PathBuf,
    /// Address advertised to peers
    pub ip: String,
    /// HTTP port to listen on and advertise
    pub port: u16,
    /// Peer the registry is seeded with
    pub bootstrap: PeerNode,
    /// Delay between sync rounds
    pub sync_interval: Duration,
    /// Timeout for a single outbound request
    pub request_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ledger_data"),
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_HTTP_PORT,
            bootstrap: PeerNode::new(DEFAULT_IP, DEFAULT_HTTP_PORT, true, false),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.ip.is_empty() {
            return Err(NodeError::InvalidConfig("ip must not be empty".to_string()));
        }
        if self.sync_interval.is_zero() {
            return Err(NodeError::InvalidConfig(
                "sync interval must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(NodeError::InvalidConfig(
                "request timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything mutable about a node. Guarded by one lock so that ledger and
/// registry updates never interleave.
pub struct NodeState {
    pub ledger: Ledger,
    pub peers: PeerRegistry,
}

impl NodeState {
    pub fn new(ledger: Ledger, peers: PeerRegistry) -> Self {
        Self { ledger, peers }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}

/// Node state shared between request handlers and the sync engine
pub type SharedState = Arc<RwLock<NodeState>>;

/// A ledger node
pub struct Node {
    config: NodeConfig,
    state: SharedState,
}

impl Node {
    /// Open the ledger and seed the peer registry
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;

        let ledger = Ledger::open(&config.data_dir)?;
        let peers = PeerRegistry::with_bootstrap(
            config.ip.clone(),
            config.port,
            config.bootstrap.clone(),
        );

        Ok(Self {
            config,
            state: NodeState::new(ledger, peers).into_shared(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Build the sync engine for this node
    pub fn sync_engine(&self) -> Result<SyncEngine, NodeError> {
        let client = PeerClient::new(self.config.request_timeout)?;
        Ok(SyncEngine::new(
            self.state.clone(),
            client,
            self.config.ip.clone(),
            self.config.port,
            self.config.sync_interval,
        ))
    }

    /// Listen on the configured port until Ctrl-C
    pub async fn run(self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve HTTP on `listener` with the sync engine running alongside.
    ///
    /// When `shutdown` resolves the server drains, the sync engine is
    /// cancelled, any in-flight round is awaited, and the ledger is flushed.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        log::info!(
            "Listening on {} (advertised as {}:{})",
            local_addr,
            self.config.ip,
            self.config.port
        );

        let cancel = CancellationToken::new();
        let engine = self.sync_engine()?;
        let sync_task = tokio::spawn(engine.run(cancel.clone()));

        let app = create_router(ApiState::new(self.state.clone()));
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        log::info!("Shutting down node...");
        cancel.cancel();
        if let Err(e) = sync_task.await {
            log::error!("Sync task failed: {}", e);
        }

        self.state.read().await.ledger.flush();
        log::info!("Node stopped");

        served.map_err(NodeError::from)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
